use std::path::Path;

#[cfg(windows)]
use anyhow::{Context, Result};
#[cfg(windows)]
use tracing::info;
#[cfg(windows)]
use winreg::enums::{HKEY_CURRENT_USER, KEY_ALL_ACCESS, KEY_READ};
#[cfg(windows)]
use winreg::RegKey;

#[cfg(windows)]
const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
#[cfg(windows)]
const VALUE_NAME: &str = "GameDock";

/// Command line stored in the Run entry: quoted executable, then `args`.
pub fn login_command(executable: &Path, args: &str) -> String {
    let args = args.trim();
    let mut command = format!("\"{}\"", executable.display());
    if !args.is_empty() {
        command.push(' ');
        command.push_str(args);
    }
    command
}

#[cfg(windows)]
fn run_key(flags: u32) -> Result<RegKey> {
    RegKey::predef(HKEY_CURRENT_USER)
        .open_subkey_with_flags(RUN_KEY, flags)
        .context("Failed to open HKCU Run registry key")
}

#[cfg(windows)]
pub fn install(executable: &Path, args: &str) -> Result<()> {
    if !executable.is_file() {
        anyhow::bail!("Executable {} does not exist", executable.display());
    }
    let command = login_command(executable, args);
    run_key(KEY_ALL_ACCESS)?
        .set_value(VALUE_NAME, &command)
        .context("Failed to set Run entry")?;
    info!(command = %command, "Registered launcher to start at login");
    Ok(())
}

#[cfg(windows)]
pub fn uninstall() -> Result<()> {
    match run_key(KEY_ALL_ACCESS)?.delete_value(VALUE_NAME) {
        Ok(()) => info!("Removed login auto-start entry"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Login auto-start entry was not present");
        }
        Err(e) => return Err(e).context("Failed to delete Run entry"),
    }
    Ok(())
}

/// The command currently registered to run at login, if any.
#[cfg(windows)]
pub fn registered_command() -> Result<Option<String>> {
    match run_key(KEY_READ)?.get_value::<String, _>(VALUE_NAME) {
        Ok(command) => Ok(Some(command)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("Failed to read Run entry"),
    }
}

#[cfg(not(windows))]
pub fn install(_executable: &Path, _args: &str) -> anyhow::Result<()> {
    anyhow::bail!("Login auto-start registration is only available on Windows.")
}

#[cfg(not(windows))]
pub fn uninstall() -> anyhow::Result<()> {
    anyhow::bail!("Login auto-start registration is only available on Windows.")
}

#[cfg(not(windows))]
pub fn registered_command() -> anyhow::Result<Option<String>> {
    Ok(None)
}
