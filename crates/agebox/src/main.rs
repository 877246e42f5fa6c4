//! agebox - age encrypted secrets tracked inside a repository
//!
//! Commands:
//! - init: Create the secret registry
//! - encrypt <ID..>: Encrypt plaintext files and track them
//! - decrypt [ID..]: Decrypt tracked secrets next to their encrypted files
//! - validate [ID..]: Check tracked secrets are present and decryptable
//! - reencrypt [ID..]: Re-encrypt tracked secrets to the current public keys
//! - cat <ID>: Print a decrypted secret without writing it to disk
//! - untrack <ID..>: Stop tracking secrets
//! - list: List tracked secrets

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agebox::error::BoxError;
use agebox::ops::{
    cat, decrypt, encrypt, reencrypt, track, validate, DecryptBoxRequest, EncryptBoxRequest, ReencryptBoxRequest,
    UntrackBoxRequest, ValidateBoxRequest,
};
use agebox::process::{IdProcessor, IgnoreMatcher, ProcessorChain};
use agebox::storage::{
    FsKeyRepository, FsSecretRepository, FsTrackRepository, KeyRepository, SecretRepository, TrackRepository,
};
use agebox::{AgeEncrypter, CancellationToken, Encrypter};
use agebox_core::config::ConfigLayer;
use agebox_core::BoxConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agebox")]
#[command(about = "Age encrypted secret files tracked inside a repository")]
#[command(version)]
#[command(after_help = r#"FILES:
    <root>/keys/            Public keys used to encrypt (one age recipient per line)
    ~/.config/agebox/keys   Private keys used to decrypt
    <root>/.ageboxreg.yml   Registry of tracked secrets
    <root>/.ageboxignore    Glob patterns of ids that are never processed
    <root>/agebox.yaml      Project configuration

LOGGING:
    Set RUST_LOG=agebox=debug for per-secret progress"#)]
struct Cli {
    /// Box root, secret ids are relative to it
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Public keys file or directory
    #[arg(long, global = true)]
    public_keys: Option<PathBuf>,

    /// Private keys file or directory
    #[arg(long, global = true)]
    private_keys: Option<PathBuf>,

    /// Secrets processed in parallel
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the secret registry if it does not exist
    Init,

    /// Encrypt plaintext files, remove the plaintext and track them
    Encrypt {
        /// Secret ids (paths relative to the root)
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Decrypt tracked secrets (all of them when no id is given)
    Decrypt {
        ids: Vec<String>,
        /// Overwrite existing plaintext files
        #[arg(long)]
        force: bool,
    },

    /// Check tracked secrets are present and decrypt with the private keys
    Validate {
        ids: Vec<String>,
        /// Only check that the encrypted files exist
        #[arg(long)]
        no_decrypt: bool,
    },

    /// Re-encrypt tracked secrets to the current public keys
    Reencrypt { ids: Vec<String> },

    /// Print a decrypted secret to stdout
    Cat { id: String },

    /// Stop tracking secrets
    Untrack {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Also delete the encrypted files
        #[arg(long)]
        delete: bool,
    },

    /// List tracked secrets
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },
}

/// Capabilities shared by every command
struct App {
    config: BoxConfig,
    /// Registry file already on disk
    initialized: bool,
    key_repo: Arc<dyn KeyRepository>,
    secret_repo: Arc<dyn SecretRepository>,
    track_repo: Arc<dyn TrackRepository>,
    encrypter: Arc<dyn Encrypter>,
    id_processor: Arc<dyn IdProcessor>,
}

impl App {
    fn new(cli: &Cli) -> Result<Self> {
        let root = cli
            .root
            .canonicalize()
            .with_context(|| format!("Box root not found: {}", cli.root.display()))?;

        // Key paths given on the command line are relative to the cwd, not the root
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let config = BoxConfig::load(&root)?.with_layer(ConfigLayer {
            public_keys: cli.public_keys.as_deref().map(|p| absolute(&cwd, p)),
            private_keys: cli.private_keys.as_deref().map(|p| absolute(&cwd, p)),
            workers: cli.workers,
            ..Default::default()
        });

        let ignore = IgnoreMatcher::load(&config.ignore_file)?;
        let id_processor = ProcessorChain::for_box(&config.root, &config.extension, ignore);
        let track_repo = FsTrackRepository::new(&config.registry_file);

        Ok(Self {
            initialized: track_repo.exists(),
            key_repo: Arc::new(FsKeyRepository::new(&config.public_keys, &config.private_keys)),
            secret_repo: Arc::new(FsSecretRepository::new(&config.root, &config.extension)),
            track_repo: Arc::new(track_repo),
            encrypter: Arc::new(AgeEncrypter::new()),
            id_processor: Arc::new(id_processor),
            config,
        })
    }
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// First characters of a fingerprint for display
fn short_fingerprint(fingerprint: &str) -> String {
    fingerprint.chars().take(12).collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::new(&cli)?;
    let ctx = CancellationToken::new();

    match cli.command {
        Commands::Init => cmd_init(&app, &ctx),
        Commands::Encrypt { ids } => cmd_encrypt(&app, &ctx, ids),
        Commands::Decrypt { ids, force } => cmd_decrypt(&app, &ctx, ids, force),
        Commands::Validate { ids, no_decrypt } => cmd_validate(&app, &ctx, ids, !no_decrypt),
        Commands::Reencrypt { ids } => cmd_reencrypt(&app, &ctx, ids),
        Commands::Cat { id } => cmd_cat(&app, &ctx, &id),
        Commands::Untrack { ids, delete } => cmd_untrack(&app, &ctx, ids, delete),
        Commands::List { json } => cmd_list(&app, &ctx, json),
    }
}

/// Print per-secret failures before handing the error to anyhow
fn report(err: BoxError) -> anyhow::Error {
    for failure in err.failures() {
        eprintln!("error: {}", failure);
    }
    match err {
        BoxError::Failed(agg) => anyhow::anyhow!("{} secret(s) failed", agg.failures().len()),
        other => other.into(),
    }
}

fn cmd_init(app: &App, ctx: &CancellationToken) -> Result<()> {
    let service = track::Service::new(track::ServiceConfig {
        secret_repo: app.secret_repo.clone(),
        track_repo: app.track_repo.clone(),
        id_processor: app.id_processor.clone(),
    });

    if app.initialized {
        println!("warning: Box already initialized");
    }

    let tracked = service.init(ctx).map_err(report)?;
    println!("success: Box initialized at {}", app.config.root.display());
    println!("Tracked secrets: {}", tracked);
    Ok(())
}

fn cmd_encrypt(app: &App, ctx: &CancellationToken, ids: Vec<String>) -> Result<()> {
    let service = encrypt::Service::new(encrypt::ServiceConfig {
        key_repo: app.key_repo.clone(),
        secret_repo: app.secret_repo.clone(),
        track_repo: app.track_repo.clone(),
        encrypter: app.encrypter.clone(),
        id_processor: app.id_processor.clone(),
        workers: app.config.workers,
    });

    let done = service
        .encrypt_box(ctx, EncryptBoxRequest { secret_ids: ids })
        .map_err(report)?;
    for id in &done {
        println!("success: Secret encrypted: {}", id);
    }
    Ok(())
}

fn cmd_decrypt(app: &App, ctx: &CancellationToken, ids: Vec<String>, force: bool) -> Result<()> {
    let service = decrypt::Service::new(decrypt::ServiceConfig {
        key_repo: app.key_repo.clone(),
        secret_repo: app.secret_repo.clone(),
        track_repo: app.track_repo.clone(),
        encrypter: app.encrypter.clone(),
        id_processor: app.id_processor.clone(),
        workers: app.config.workers,
    });

    let outcome = service
        .decrypt_box(ctx, DecryptBoxRequest { secret_ids: ids, force })
        .map_err(report)?;
    for id in &outcome.decrypted {
        println!("success: Secret decrypted: {}", id);
    }
    for id in &outcome.skipped {
        println!("warning: Plaintext exists, skipped (use --force): {}", id);
    }
    Ok(())
}

fn cmd_validate(app: &App, ctx: &CancellationToken, ids: Vec<String>, decrypt: bool) -> Result<()> {
    // Without ids the whole registry is validated
    let secret_ids = if ids.is_empty() {
        app.track_repo.get_secret_registry(ctx)?.ids()
    } else {
        ids
    };

    let service = validate::Service::new(validate::ServiceConfig {
        key_repo: app.key_repo.clone(),
        secret_repo: app.secret_repo.clone(),
        encrypter: app.encrypter.clone(),
        id_processor: app.id_processor.clone(),
        workers: app.config.workers,
    });

    service
        .validate_box(ctx, ValidateBoxRequest { secret_ids, decrypt })
        .map_err(report)?;
    println!("success: Box is valid");
    Ok(())
}

fn cmd_reencrypt(app: &App, ctx: &CancellationToken, ids: Vec<String>) -> Result<()> {
    let service = reencrypt::Service::new(reencrypt::ServiceConfig {
        key_repo: app.key_repo.clone(),
        secret_repo: app.secret_repo.clone(),
        track_repo: app.track_repo.clone(),
        encrypter: app.encrypter.clone(),
        id_processor: app.id_processor.clone(),
        workers: app.config.workers,
    });

    let done = service
        .reencrypt_box(ctx, ReencryptBoxRequest { secret_ids: ids })
        .map_err(report)?;
    for id in &done {
        println!("success: Secret re-encrypted: {}", id);
    }
    Ok(())
}

fn cmd_cat(app: &App, ctx: &CancellationToken, id: &str) -> Result<()> {
    let service = cat::Service::new(cat::ServiceConfig {
        key_repo: app.key_repo.clone(),
        secret_repo: app.secret_repo.clone(),
        encrypter: app.encrypter.clone(),
        id_processor: app.id_processor.clone(),
    });

    let plain = service.cat(ctx, id).map_err(report)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&plain)?;
    stdout.flush()?;
    Ok(())
}

fn cmd_untrack(app: &App, ctx: &CancellationToken, ids: Vec<String>, delete: bool) -> Result<()> {
    let service = track::Service::new(track::ServiceConfig {
        secret_repo: app.secret_repo.clone(),
        track_repo: app.track_repo.clone(),
        id_processor: app.id_processor.clone(),
    });

    let done = service
        .untrack_box(ctx, UntrackBoxRequest { secret_ids: ids, delete })
        .map_err(report)?;
    for id in &done {
        println!("success: Secret untracked: {}", id);
    }
    Ok(())
}

fn cmd_list(app: &App, ctx: &CancellationToken, json: bool) -> Result<()> {
    let registry = app.track_repo.get_secret_registry(ctx)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&registry.secrets)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No secrets tracked. Add one with: agebox encrypt <id>");
        return Ok(());
    }

    println!("Tracked Secrets");
    println!();
    for (id, tracked) in &registry.secrets {
        println!(
            "  {:<40} {}  {}",
            id,
            short_fingerprint(&tracked.fingerprint),
            tracked.encrypted_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["agebox", "init"]).unwrap();
        assert!(matches!(cli.command, Commands::Init));
        assert_eq!(cli.root, PathBuf::from("."));

        let cli = Cli::try_parse_from(["agebox", "encrypt", "a.txt", "b/c.txt"]).unwrap();
        if let Commands::Encrypt { ids } = cli.command {
            assert_eq!(ids, vec!["a.txt", "b/c.txt"]);
        } else {
            panic!("Expected Encrypt command");
        }

        let cli = Cli::try_parse_from(["agebox", "decrypt", "--force"]).unwrap();
        if let Commands::Decrypt { ids, force } = cli.command {
            assert!(ids.is_empty());
            assert!(force);
        } else {
            panic!("Expected Decrypt command");
        }
    }

    #[test]
    fn test_cli_validate() {
        let cli = Cli::try_parse_from(["agebox", "validate"]).unwrap();
        if let Commands::Validate { ids, no_decrypt } = cli.command {
            assert!(ids.is_empty());
            assert!(!no_decrypt);
        } else {
            panic!("Expected Validate command");
        }

        let cli = Cli::try_parse_from(["agebox", "validate", "--no-decrypt", "x.agebox"]).unwrap();
        if let Commands::Validate { ids, no_decrypt } = cli.command {
            assert_eq!(ids, vec!["x.agebox"]);
            assert!(no_decrypt);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["agebox", "cat", "db/pass", "--root", "/tmp/box", "--workers", "4"]).unwrap();
        assert_eq!(cli.root, PathBuf::from("/tmp/box"));
        assert_eq!(cli.workers, Some(4));
        assert!(matches!(cli.command, Commands::Cat { ref id } if id == "db/pass"));
    }

    #[test]
    fn test_cli_key_paths_are_relative_to_cwd() {
        let cli = Cli::try_parse_from(["agebox", "list", "--root", "sub", "--public-keys", "./k"]).unwrap();
        let cwd = Path::new("/work");

        let public = cli.public_keys.as_deref().map(|p| absolute(cwd, p)).unwrap();
        assert_eq!(public, PathBuf::from("/work/./k"));
        assert_eq!(absolute(cwd, Path::new("/etc/agebox/keys")), PathBuf::from("/etc/agebox/keys"));

        // Absolute paths survive the root layer untouched
        let config = BoxConfig::defaults(Path::new("/work/sub")).with_layer(ConfigLayer {
            public_keys: Some(public),
            ..Default::default()
        });
        assert_eq!(config.public_keys, PathBuf::from("/work/./k"));
    }

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(short_fingerprint("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_fingerprint("abc"), "abc");
        assert_eq!(short_fingerprint("ééééééééééééééé"), "éééééééééééé");
    }

    #[test]
    fn test_cli_requires_ids() {
        assert!(Cli::try_parse_from(["agebox", "encrypt"]).is_err());
        assert!(Cli::try_parse_from(["agebox", "untrack"]).is_err());
    }
}
