fn main() -> anyhow::Result<()> {
    sealvm::init_logging();
    sealvm::run()
}
