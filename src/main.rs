use kernjit::cli;

fn main() -> anyhow::Result<()> {
    if let Err(err) = cli::run() {
        // per-kernel failures were already reported by `build`
        if !err.to_string().contains(cli::BUILD_FAILED) {
            eprintln!("Error: {err:?}");
        }
        std::process::exit(1);
    }
    Ok(())
}
