//! `tether keygen` — generate an RSA key pair.
//!
//! Writes `key.pem` (private, PKCS#1) and `key.pub.pem` (public, PKIX)
//! to the output directory. The public key goes into the relay's
//! `[[clients]]` config; the private key stays with the client.

use anyhow::{Context, Result};
use std::fs;
use tracing::info;

pub fn run(out_dir: &str, bits: usize) -> Result<()> {
    let dir = super::expand_tilde(out_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let (private_pem, public_pem) = tether_core::crypto::generate_keypair(bits)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("key generation failed")?;

    let private_path = dir.join("key.pem");
    let public_path = dir.join("key.pub.pem");
    fs::write(&private_path, private_pem)
        .with_context(|| format!("failed to write {}", private_path.display()))?;
    fs::write(&public_path, &public_pem)
        .with_context(|| format!("failed to write {}", public_path.display()))?;

    // Private keys should not be group/world readable.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to chmod {}", private_path.display()))?;
    }

    info!(bits, private = %private_path.display(), "key pair generated");

    println!("Generated RSA-{bits} key pair");
    println!("  Private key: {}", private_path.display());
    println!("  Public key:  {}", public_path.display());

    Ok(())
}
