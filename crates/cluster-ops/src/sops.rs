//! Secret sealing with SOPS and age keys.

use std::path::Path;

use tracing::{info, warn};

use crate::command::{run_checked, CommandRunner, Invocation, ToolError};

const AGE_KEYGEN: &str = "age-keygen";
const SOPS: &str = "sops";
const PUBLIC_KEY_MARKER: &str = "# public key:";

/// Outcome of pushing a public key into the routing config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPropagation {
    /// The placeholder was replaced.
    Replaced,
    /// The key was already present.
    AlreadyPresent,
    /// Neither placeholder nor key were found; left untouched.
    NotReferenced,
}

/// Generate a fresh age keypair at `path`.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or
/// `age-keygen` fails.
pub fn generate_keypair(runner: &dyn CommandRunner, path: &Path) -> Result<(), ToolError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
        restrict_dir(parent)?;
    }
    run_checked(runner, &Invocation::new(AGE_KEYGEN).arg("-o").path_arg(path))?;
    info!(path = %path.display(), "Generated age keypair");
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> Result<(), ToolError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| ToolError::io(dir, e))
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> Result<(), ToolError> {
    Ok(())
}

/// Read the public half of an age key file.
///
/// Uses the `# public key:` comment age-keygen writes; falls back to
/// `age-keygen -y` for key files without it.
///
/// # Errors
///
/// Returns an error if the key file is unreadable or yields no key.
pub fn public_key(runner: &dyn CommandRunner, path: &Path) -> Result<String, ToolError> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolError::io(path, e))?;
    if let Some(key) = parse_public_key_comment(&content) {
        return Ok(key);
    }

    let out = run_checked(runner, &Invocation::new(AGE_KEYGEN).arg("-y").path_arg(path))?;
    let key = out.stdout.trim().to_string();
    if key.starts_with("age1") {
        Ok(key)
    } else {
        Err(ToolError::parse("age public key", format!("unexpected output: {key}")))
    }
}

fn parse_public_key_comment(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|l| l.trim().strip_prefix(PUBLIC_KEY_MARKER))
        .map(str::trim)
        .find(|k| k.starts_with("age1"))
        .map(str::to_string)
}

/// Whether the routing config still carries the placeholder token.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn has_placeholder(routing_config: &Path, placeholder: &str) -> Result<bool, ToolError> {
    match std::fs::read_to_string(routing_config) {
        Ok(content) => Ok(content.contains(placeholder)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ToolError::io(routing_config, e)),
    }
}

/// Replace the placeholder token in `.sops.yaml` with the public key.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub fn propagate_public_key(
    routing_config: &Path,
    placeholder: &str,
    public_key: &str,
) -> Result<KeyPropagation, ToolError> {
    let content =
        std::fs::read_to_string(routing_config).map_err(|e| ToolError::io(routing_config, e))?;

    if content.contains(placeholder) {
        let updated = content.replace(placeholder, public_key);
        std::fs::write(routing_config, updated).map_err(|e| ToolError::io(routing_config, e))?;
        info!(file = %routing_config.display(), "Propagated age public key");
        Ok(KeyPropagation::Replaced)
    } else if content.contains(public_key) {
        Ok(KeyPropagation::AlreadyPresent)
    } else {
        warn!(
            file = %routing_config.display(),
            "Routing config references neither the placeholder nor the local public key"
        );
        Ok(KeyPropagation::NotReferenced)
    }
}

/// Whether a YAML file already carries sops metadata.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn is_sops_encrypted(path: &Path) -> Result<bool, ToolError> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolError::io(path, e))?;
    Ok(content.lines().any(|l| l.starts_with("sops:")))
}

/// Encrypt a file in place according to the routing config.
///
/// # Errors
///
/// Returns an error if sops fails.
pub fn encrypt_in_place(
    runner: &dyn CommandRunner,
    file: &Path,
    age_key_file: &Path,
) -> Result<(), ToolError> {
    let inv = Invocation::new(SOPS)
        .args(["--encrypt", "--in-place"])
        .path_arg(file)
        .env("SOPS_AGE_KEY_FILE", age_key_file.to_string_lossy().into_owned());
    run_checked(runner, &inv)?;
    info!(file = %file.display(), "Encrypted with sops");
    Ok(())
}
