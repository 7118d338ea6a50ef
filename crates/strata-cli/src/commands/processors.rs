//! `strata processors` -- list the registered processors.

/// Run the `processors` subcommand.
pub fn run() -> anyhow::Result<()> {
    let registry = super::processor_registry()?;
    println!("Registered processors ({}):", registry.len());
    for name in registry.names() {
        println!("  {name}");
    }
    Ok(())
}
