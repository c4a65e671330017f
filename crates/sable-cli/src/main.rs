fn main() -> anyhow::Result<()> {
    env_logger::init();
    sable_cli::run()
}
