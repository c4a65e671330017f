//! Aller-retour complet : texte source → compilation en mémoire →
//! artefacts → chargeur isolé → réflexion / instanciation / invocation.

use std::sync::Arc;

use sable_compiler::{CompileError, CompileService, ServiceOptions, Source};
use sable_core::image::TypeRef;
use sable_runtime::{ClassBuilder, HostRegistry, Interp, IsolatedLoader, Loader, ResolveError, Value};

fn service(reg: &Arc<HostRegistry>) -> CompileService {
    CompileService::new(reg.clone(), ServiceOptions::default())
}

fn compile_and_load(reg: &Arc<HostRegistry>, srcs: &[(&str, &str)]) -> IsolatedLoader {
    let svc = service(reg);
    let sources: Vec<Source> = srcs.iter().map(|(n, s)| Source::from_text(*n, *s)).collect();
    let units = svc.compile(&sources).expect("compilation ok");
    IsolatedLoader::new(reg.clone(), units)
}

#[test]
fn class_without_body() {
    let reg = HostRegistry::new();
    let loader = compile_and_load(&reg, &[("NoBody", "class NoBody{}")]);

    let no_body = loader.resolve("NoBody").expect("NoBody");
    // la superclasse est la racine — le même objet-classe que celui du
    // registre, pas un homonyme
    assert!(Arc::ptr_eq(no_body.superclass().expect("super"), &reg.root()));
    assert_eq!(no_body.declared_methods().len(), 0);
    assert_eq!(no_body.declared_fields().len(), 0);
    assert_eq!(no_body.declared_nested().len(), 0);
    // le constructeur par défaut est toujours déclaré
    assert_eq!(no_body.declared_ctors().len(), 1);

    let mut interp = Interp::new(&loader);
    let inst = interp.instantiate(&no_body, &[]).expect("instanciable");
    assert!(inst.as_obj().is_some());
}

#[test]
fn class_with_one_field() {
    let reg = HostRegistry::new();
    let loader = compile_and_load(&reg, &[("AField", "class AField{str abc;}")]);

    let c = loader.resolve("AField").expect("AField");
    assert!(Arc::ptr_eq(c.superclass().expect("super"), &reg.root()));
    assert_eq!(c.declared_methods().len(), 0);
    assert_eq!(c.declared_fields().len(), 1);
    assert_eq!(c.declared_ctors().len(), 1);
    assert_eq!(c.declared_fields()[0].name, "abc");
    assert_eq!(c.declared_fields()[0].ty, TypeRef::Str);
}

#[test]
fn batch_extends_in_both_orders() {
    for srcs in [
        [("a", "class A{}"), ("b", "class B extends A{}")],
        [("b", "class B extends A{}"), ("a", "class A{}")],
    ] {
        let reg = HostRegistry::new();
        let loader = compile_and_load(&reg, &srcs);

        let b = loader.resolve("B").expect("B");
        let a = loader.resolve("A").expect("A");
        // identité référentielle, pas simple égalité de noms
        assert!(Arc::ptr_eq(b.superclass().expect("super"), &a));
        assert!(b.is_subclass_of(&a));
        assert!(b.is_subclass_of(&reg.root()));
    }
}

#[test]
fn single_consumption_then_cache_then_parent() {
    let reg = HostRegistry::new();
    let loader = compile_and_load(&reg, &[("o", "class Once{}")]);

    assert!(loader.is_pending("Once"));
    let first = loader.resolve("Once").expect("première résolution");
    // l'entrée privée est consommée…
    assert!(!loader.is_pending("Once"));
    assert_eq!(loader.pending_len(), 0);
    // …et la seconde résolution sert le cache, sans redéfinir
    let second = loader.resolve("Once").expect("cache");
    assert!(Arc::ptr_eq(&first, &second));

    // un nom inconnu traverse la table privée et la chaîne parente
    match loader.resolve("never.Seen") {
        Err(ResolveError::NotFound(n)) => assert_eq!(n, "never.Seen"),
        other => panic!("attendu NotFound, got {other:?}"),
    }
}

#[test]
fn nested_class_produces_two_units() {
    let reg = HostRegistry::new();
    let svc = service(&reg);
    let units = svc
        .compile(&[Source::from_text("outer", "package p; class Outer { class Inner {} }")])
        .expect("ok");
    // une source, deux artefacts, ordre de capture
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].fqn, "p.Outer");
    assert_eq!(units[1].fqn, "p.Outer.Inner");

    let loader = IsolatedLoader::new(reg.clone(), units);
    let outer = loader.resolve("p.Outer").expect("Outer");
    assert_eq!(outer.declared_nested(), ["p.Outer.Inner".to_string()]);
    let inner = loader.resolve("p.Outer.Inner").expect("Inner");
    assert!(Arc::ptr_eq(inner.superclass().expect("super"), &reg.root()));
}

/// Le scénario « Bar says hello » : un fragment référence un type visible
/// uniquement via le classpath hôte, hérite de ses membres natifs, et les
/// invoque une fois chargé.
#[test]
fn host_visible_type_compiles_and_runs() {
    let reg = HostRegistry::new();
    let bar = ClassBuilder::new("foo.bar.Bar", reg.root())
        .native_method("hello", vec![TypeRef::Str], TypeRef::Str, |_, args| {
            Ok(Value::Str(format!(
                "Bar says hello: {}",
                args.first().and_then(Value::as_str).unwrap_or("?")
            )))
        })
        .build();
    reg.register(bar);

    let impl1 = r#"
        package hello.test.no.sense;
        class TestImpl extends foo.bar.Bar {
            TestImpl(str hello) {
                super();
                print(hello);
            }
        }
    "#;
    let impl2 = r#"
        package hello.test.no.sense;
        class TestImpl2 extends hello.test.no.sense.TestImpl {
            TestImpl2(str hello) {
                super("hello2 " + hello);
            }
        }
    "#;
    let loader = compile_and_load(
        &reg,
        &[("hello.test.no.sense.TestImpl", impl1), ("hello.test.no.sense.TestImpl", impl2)],
    );

    let mut interp = Interp::new(&loader);

    let c1 = loader.resolve("hello.test.no.sense.TestImpl").expect("TestImpl");
    let i1 = interp
        .instantiate(&c1, &[Value::Str("hello.test.no.sense.TestImpl".into())])
        .expect("ctor/1");
    let r1 = interp
        .invoke(&i1, "hello", &[Value::Str("hello.test.no.sense.TestImpl".into())])
        .expect("méthode héritée");
    assert_eq!(r1.as_str(), Some("Bar says hello: hello.test.no.sense.TestImpl"));

    // TestImpl2 → TestImpl → Bar : deux niveaux, chaînage super(...) compris
    let c2 = loader.resolve("hello.test.no.sense.TestImpl2").expect("TestImpl2");
    let i2 = interp.instantiate(&c2, &[Value::Str("x".into())]).expect("ctor/1");
    let r2 = interp
        .invoke(&i2, "hello", &[Value::Str("hello.test.no.sense.TestImpl2".into())])
        .expect("méthode héritée");
    assert_eq!(r2.as_str(), Some("Bar says hello: hello.test.no.sense.TestImpl2"));

    // les print() des constructeurs ont été capturés (le second via super)
    let out = interp.take_output();
    assert!(out.contains("hello.test.no.sense.TestImpl"));
    assert!(out.contains("hello2 x"));
}

#[test]
fn invalid_fragment_fails_whole_batch() {
    let reg = HostRegistry::new();
    let svc = service(&reg);
    let err = svc
        .compile(&[
            Source::from_text("ok", "class Fine{}"),
            Source::from_text("ko", "class Broken { this is not sable }"),
        ])
        .expect_err("le lot entier doit échouer");
    match err {
        CompileError::Rejected { report, sources } => {
            assert!(report.contains("ko"));
            assert!(sources.contains("class Fine{}"));
        }
        other => panic!("attendu Rejected, got {other}"),
    }
    // aucun artefact n'a fuité pour les fragments valides : rien à charger
}

#[test]
fn duplicate_logical_names_are_fine() {
    // le nom logique est consultatif : deux sources sous le même nom
    // passent tant que les FQN déclarés diffèrent
    let reg = HostRegistry::new();
    let loader = compile_and_load(
        &reg,
        &[("same", "package q; class One{}"), ("same", "package q; class Two{}")],
    );
    assert!(loader.resolve("q.One").is_ok());
    assert!(loader.resolve("q.Two").is_ok());
}
