//! interp.rs — Interpréteur de bytecode : machine à pile minimale.
//!
//! C'est la facilité par laquelle l'hôte instancie et invoque les unités
//! chargées. L'interpréteur tient le chargeur courant : les `new` rencontrés
//! dans les corps résolvent leurs classes **à travers lui** (et peuvent donc
//! consommer des définitions privées en attente).
//!
//! Garde-fous : limite d'instructions (anti-boucle), pile et indices
//! vérifiés. `print(...)` est capturé dans un tampon relevable.

use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;

use sable_core::bytecode::{Chunk, ConstValue, Op};

use crate::class::{Body, Class};
use crate::loader::{Loader, ResolveError};
use crate::value::{Instance, Value};

/// Fautes d'exécution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("méthode introuvable: {class}::{name}/{argc}")]
    NoSuchMethod { class: String, name: String, argc: usize },
    #[error("constructeur introuvable: {class}/{argc}")]
    NoSuchCtor { class: String, argc: usize },
    #[error("champ introuvable: {class}::{name}")]
    NoSuchField { class: String, name: String },
    #[error("récepteur non-objet: {0}")]
    NotAnObject(String),
    #[error("types incompatibles pour `{op}`")]
    TypeMismatch { op: &'static str },
    #[error("division par zéro")]
    DivideByZero,
    #[error("pile vide (bytecode incohérent)")]
    StackUnderflow,
    #[error("constante invalide #{0}")]
    BadConst(u32),
    #[error("slot local invalide #{0}")]
    BadLocal(u8),
    #[error("condition non booléenne")]
    NonBoolCondition,
    #[error("PC hors limites")]
    PcOutOfRange,
    #[error("limite d'instructions atteinte ({0})")]
    StepLimit(usize),
}

/// Interpréteur lié à un chargeur (et donc à un thread, comme lui).
pub struct Interp<'a> {
    loader: &'a dyn Loader,
    out: String,
    steps: usize,
    max_steps: usize,
}

impl<'a> Interp<'a> {
    pub fn new(loader: &'a dyn Loader) -> Self {
        Self { loader, out: String::new(), steps: 0, max_steps: 1_000_000 }
    }

    /// Remplace le garde-fou d'instructions.
    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    /// Relève (et vide) la sortie capturée par `print`.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }

    /// Alloue une instance et exécute le constructeur d'arité
    /// correspondante.
    pub fn instantiate(
        &mut self,
        class: &Arc<Class>,
        args: &[Value],
    ) -> Result<Value, ExecError> {
        let this = Value::Obj(Rc::new(Instance::new(Arc::clone(class))));
        self.run_ctor(class, &this, args)?;
        Ok(this)
    }

    /// Dispatch dynamique : méthode par nom + arité sur la classe du
    /// récepteur, chaîne d'héritage comprise.
    pub fn invoke(
        &mut self,
        recv: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, ExecError> {
        let Some(inst) = recv.as_obj() else {
            return Err(ExecError::NotAnObject(format!("appel de `{name}` sur `{recv}`")));
        };
        let class = Arc::clone(inst.class());
        let Some((decl, method)) = class.lookup_method(name, args.len()) else {
            return Err(ExecError::NoSuchMethod {
                class: class.name().to_string(),
                name: name.to_string(),
                argc: args.len(),
            });
        };
        self.run_body(&decl, &method.body, recv, args)
    }

    fn run_ctor(
        &mut self,
        class: &Arc<Class>,
        this: &Value,
        args: &[Value],
    ) -> Result<(), ExecError> {
        let Some(ctor) = class.ctor_by_arity(args.len()) else {
            return Err(ExecError::NoSuchCtor {
                class: class.name().to_string(),
                argc: args.len(),
            });
        };
        let body = Arc::clone(ctor);
        self.run_body(class, &body.body, this, args).map(|_| ())
    }

    fn run_body(
        &mut self,
        decl_class: &Arc<Class>,
        body: &Body,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, ExecError> {
        match body {
            Body::Native(f) => f(this, args),
            Body::Chunk(chunk) => {
                let mut locals = Vec::with_capacity(1 + args.len());
                locals.push(this.clone());
                locals.extend_from_slice(args);
                self.exec_chunk(decl_class, chunk, locals)
            }
        }
    }

    /// Boucle d'exécution d'un chunk. `frame_class` est la classe
    /// **déclarante** du corps (sert au chaînage `SuperInit`).
    fn exec_chunk(
        &mut self,
        frame_class: &Arc<Class>,
        chunk: &Chunk,
        mut locals: Vec<Value>,
    ) -> Result<Value, ExecError> {
        let ops = &chunk.ops;
        let mut stack: Vec<Value> = Vec::with_capacity(16);
        let mut pc: i64 = 0;

        while (pc as usize) < ops.len() {
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(ExecError::StepLimit(self.max_steps));
            }

            let op = ops[pc as usize];
            pc += 1;

            use Op::*;
            match op {
                Nop => {}
                Pop => {
                    pop(&mut stack)?;
                }
                Return => return pop(&mut stack),
                ReturnVoid => return Ok(Value::Null),

                // ---- Constantes
                LoadTrue => stack.push(Value::Bool(true)),
                LoadFalse => stack.push(Value::Bool(false)),
                LoadNull => stack.push(Value::Null),
                LoadConst(ix) => {
                    let c = chunk.consts.get(ix).ok_or(ExecError::BadConst(ix))?;
                    stack.push(match c {
                        ConstValue::Null => Value::Null,
                        ConstValue::Bool(b) => Value::Bool(*b),
                        ConstValue::I64(i) => Value::I64(*i),
                        ConstValue::F64(x) => Value::F64(*x),
                        ConstValue::Str(s) => Value::Str(s.clone()),
                    });
                }

                // ---- Locales
                LoadLocal(s) => {
                    let v = locals.get(s as usize).ok_or(ExecError::BadLocal(s))?;
                    stack.push(v.clone());
                }
                StoreLocal(s) => {
                    let v = pop(&mut stack)?;
                    let slot = s as usize;
                    if slot == locals.len() {
                        locals.push(v);
                    } else if slot < locals.len() {
                        locals[slot] = v;
                    } else {
                        return Err(ExecError::BadLocal(s));
                    }
                }

                // ---- Objets
                GetField(ix) => {
                    let name = const_str(chunk, ix)?;
                    let recv = pop(&mut stack)?;
                    let inst = as_obj(&recv, name)?;
                    let v = inst.get(name).ok_or_else(|| ExecError::NoSuchField {
                        class: inst.class().name().to_string(),
                        name: name.to_string(),
                    })?;
                    stack.push(v);
                }
                SetField(ix) => {
                    let name = const_str(chunk, ix)?;
                    let value = pop(&mut stack)?;
                    let recv = pop(&mut stack)?;
                    let inst = as_obj(&recv, name)?;
                    if !inst.set(name, value) {
                        return Err(ExecError::NoSuchField {
                            class: inst.class().name().to_string(),
                            name: name.to_string(),
                        });
                    }
                }
                Invoke(ix, argc) => {
                    let name = const_str(chunk, ix)?.to_string();
                    let args = pop_n(&mut stack, argc as usize)?;
                    let recv = pop(&mut stack)?;
                    let r = self.invoke(&recv, &name, &args)?;
                    stack.push(r);
                }
                New(ix, argc) => {
                    let fqn = const_str(chunk, ix)?;
                    let class = self.loader.resolve(fqn)?;
                    let args = pop_n(&mut stack, argc as usize)?;
                    let inst = self.instantiate(&class, &args)?;
                    stack.push(inst);
                }
                SuperInit(argc) => {
                    let args = pop_n(&mut stack, argc as usize)?;
                    let this = locals.first().cloned().ok_or(ExecError::StackUnderflow)?;
                    if let Some(sup) = frame_class.superclass() {
                        let sup = Arc::clone(sup);
                        self.run_ctor(&sup, &this, &args)?;
                    }
                }

                // ---- Contrôle
                Jump(off) => {
                    pc += i64::from(off);
                    if pc < 0 || (pc as usize) > ops.len() {
                        return Err(ExecError::PcOutOfRange);
                    }
                }
                JumpIfFalse(off) => match pop(&mut stack)? {
                    Value::Bool(false) => {
                        pc += i64::from(off);
                        if pc < 0 || (pc as usize) > ops.len() {
                            return Err(ExecError::PcOutOfRange);
                        }
                    }
                    Value::Bool(true) => {}
                    _ => return Err(ExecError::NonBoolCondition),
                },

                // ---- Arith / logique
                Add => bin_add(&mut stack)?,
                Sub => bin_num(&mut stack, "-", |a, b| a.checked_sub(b), |a, b| a - b)?,
                Mul => bin_num(&mut stack, "*", |a, b| a.checked_mul(b), |a, b| a * b)?,
                Div => bin_div(&mut stack, false)?,
                Mod => bin_div(&mut stack, true)?,
                Neg => {
                    let v = pop(&mut stack)?;
                    stack.push(match v {
                        Value::I64(i) => Value::I64(-i),
                        Value::F64(x) => Value::F64(-x),
                        _ => return Err(ExecError::TypeMismatch { op: "-" }),
                    });
                }
                Not => {
                    let v = pop(&mut stack)?;
                    match v {
                        Value::Bool(b) => stack.push(Value::Bool(!b)),
                        _ => return Err(ExecError::TypeMismatch { op: "!" }),
                    }
                }
                Eq => {
                    let (a, b) = pop2(&mut stack)?;
                    stack.push(Value::Bool(a.loose_eq(&b)));
                }
                Ne => {
                    let (a, b) = pop2(&mut stack)?;
                    stack.push(Value::Bool(!a.loose_eq(&b)));
                }
                Lt => bin_cmp(&mut stack, "<", |o| o == std::cmp::Ordering::Less)?,
                Le => bin_cmp(&mut stack, "<=", |o| o != std::cmp::Ordering::Greater)?,
                Gt => bin_cmp(&mut stack, ">", |o| o == std::cmp::Ordering::Greater)?,
                Ge => bin_cmp(&mut stack, ">=", |o| o != std::cmp::Ordering::Less)?,

                // ---- I/O
                Print => {
                    let v = pop(&mut stack)?;
                    let _ = writeln!(self.out, "{v}");
                }
            }
        }
        // chunk sans retour explicite (le codegen en ajoute toujours un)
        Ok(Value::Null)
    }
}

/* ───────────────────────── Aides pile & arith ───────────────────────── */

fn pop(stack: &mut Vec<Value>) -> Result<Value, ExecError> {
    stack.pop().ok_or(ExecError::StackUnderflow)
}

fn pop2(stack: &mut Vec<Value>) -> Result<(Value, Value), ExecError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

/// Dépile `n` arguments dans l'ordre d'empilement (arg0 en premier).
fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, ExecError> {
    if stack.len() < n {
        return Err(ExecError::StackUnderflow);
    }
    Ok(stack.split_off(stack.len() - n))
}

fn const_str(chunk: &Chunk, ix: u32) -> Result<&str, ExecError> {
    chunk.consts.get_str(ix).ok_or(ExecError::BadConst(ix))
}

fn as_obj<'v>(v: &'v Value, what: &str) -> Result<&'v Rc<Instance>, ExecError> {
    v.as_obj().ok_or_else(|| ExecError::NotAnObject(format!("accès à `{what}` sur `{v}`")))
}

/// `+` : concaténation si l'un des deux est une chaîne, sinon numérique.
fn bin_add(stack: &mut Vec<Value>) -> Result<(), ExecError> {
    let (a, b) = pop2(stack)?;
    let r = match (&a, &b) {
        (Value::Str(s), other) => Value::Str(format!("{s}{other}")),
        (other, Value::Str(s)) => Value::Str(format!("{other}{s}")),
        (Value::I64(x), Value::I64(y)) => {
            Value::I64(x.checked_add(*y).ok_or(ExecError::TypeMismatch { op: "+" })?)
        }
        (Value::F64(x), Value::F64(y)) => Value::F64(x + y),
        (Value::I64(x), Value::F64(y)) => Value::F64(*x as f64 + y),
        (Value::F64(x), Value::I64(y)) => Value::F64(x + *y as f64),
        _ => return Err(ExecError::TypeMismatch { op: "+" }),
    };
    stack.push(r);
    Ok(())
}

fn bin_num(
    stack: &mut Vec<Value>,
    op: &'static str,
    int: impl Fn(i64, i64) -> Option<i64>,
    float: impl Fn(f64, f64) -> f64,
) -> Result<(), ExecError> {
    let (a, b) = pop2(stack)?;
    let r = match (&a, &b) {
        (Value::I64(x), Value::I64(y)) => {
            Value::I64(int(*x, *y).ok_or(ExecError::TypeMismatch { op })?)
        }
        (Value::F64(x), Value::F64(y)) => Value::F64(float(*x, *y)),
        (Value::I64(x), Value::F64(y)) => Value::F64(float(*x as f64, *y)),
        (Value::F64(x), Value::I64(y)) => Value::F64(float(*x, *y as f64)),
        _ => return Err(ExecError::TypeMismatch { op }),
    };
    stack.push(r);
    Ok(())
}

fn bin_div(stack: &mut Vec<Value>, modulo: bool) -> Result<(), ExecError> {
    let (a, b) = pop2(stack)?;
    let r = match (&a, &b) {
        (Value::I64(_), Value::I64(0)) => return Err(ExecError::DivideByZero),
        (Value::I64(x), Value::I64(y)) => {
            Value::I64(if modulo { x.wrapping_rem(*y) } else { x.wrapping_div(*y) })
        }
        (Value::F64(x), Value::F64(y)) => Value::F64(if modulo { x % y } else { x / y }),
        (Value::I64(x), Value::F64(y)) => {
            let x = *x as f64;
            Value::F64(if modulo { x % y } else { x / y })
        }
        (Value::F64(x), Value::I64(y)) => {
            let y = *y as f64;
            Value::F64(if modulo { x % y } else { x / y })
        }
        _ => return Err(ExecError::TypeMismatch { op: if modulo { "%" } else { "/" } }),
    };
    stack.push(r);
    Ok(())
}

fn bin_cmp(
    stack: &mut Vec<Value>,
    op: &'static str,
    keep: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<(), ExecError> {
    let (a, b) = pop2(stack)?;
    let ord = match (&a, &b) {
        (Value::I64(x), Value::I64(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::F64(x), Value::F64(y)) => {
            x.partial_cmp(y).ok_or(ExecError::TypeMismatch { op })?
        }
        (Value::I64(x), Value::F64(y)) => {
            (*x as f64).partial_cmp(y).ok_or(ExecError::TypeMismatch { op })?
        }
        (Value::F64(x), Value::I64(y)) => {
            x.partial_cmp(&(*y as f64)).ok_or(ExecError::TypeMismatch { op })?
        }
        _ => return Err(ExecError::TypeMismatch { op }),
    };
    stack.push(Value::Bool(keep(ord)));
    Ok(())
}

/* -------------------------------- Tests -------------------------------- */
