use tokenkeeper::settings::*;

fn main() -> anyhow::Result<()> {
    // Load settings from the default location
    let project_settings = parse_settings(None)?;
    println!("Loaded settings: {:?}", project_settings);

    // Attempt to load from an invalid path (expected to fail)
    let is_err = parse_settings(Some("")).is_err();
    println!("Error on invalid path: {:?}", is_err);

    // Attempt to load from a custom path
    // $ cargo run --bin settings_demo -- --settings=settings/release.toml
    let cli = Cli::parse();
    let project_settings = parse_settings(cli.settings.as_deref())?;
    println!(
        "Session backend: {}, access ttl: {}s, refresh ttl: {}s",
        project_settings.session.backend,
        project_settings.auth.access_ttl_secs,
        project_settings.auth.refresh_ttl_secs
    );
    println!("Signing key present: {}", project_settings.auth.signing_key.is_some());

    Ok(())
}
