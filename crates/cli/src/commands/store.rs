//! Content store commands.

use super::GlobalArgs;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use steward_store::{ContentId, ContentKey, ContentStore, StoreError, ENCRYPTION_ALGORITHM};
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct StoreArgs {
    #[command(subcommand)]
    command: StoreCommand,
}

#[derive(Subcommand)]
enum StoreCommand {
    /// Add a file and print its content identifier
    Add {
        /// File to add
        file: PathBuf,

        /// Seal with AES-256-GCM under the configured encryption key
        #[arg(long)]
        encrypt: bool,
    },
    /// Read content by identifier
    Get {
        cid: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Peer to fetch from when the content is not local
        #[arg(long)]
        peer: Option<String>,

        /// Decrypt with the configured encryption key
        #[arg(long)]
        decrypt: bool,
    },
    /// Protect content from garbage collection
    Pin { cid: String },
    /// Allow content to be garbage collected
    Unpin { cid: String },
    /// List pinned content
    Pins,
    /// Show repository totals
    Stat,
    /// Export content and everything it links to as a CAR archive
    Export {
        cid: String,

        /// Archive file to write
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Import a CAR archive
    Import {
        /// Archive file to read
        file: PathBuf,
    },
    /// Print a fresh encryption key
    Keygen,
    /// Serve blocks to peers until interrupted
    Serve {
        /// Peers to connect to after starting
        #[arg(long, value_delimiter = ',')]
        connect: Vec<String>,
    },
}

pub async fn run(global: &GlobalArgs, args: StoreArgs, cancel: &CancellationToken) -> Result<()> {
    let store = global.open_store()?;
    let result = match args.command {
        StoreCommand::Add { file, encrypt } => {
            let key = encrypt.then(|| global.encryption_key()).transpose()?;
            add(&store, file, key.as_ref())
        }
        StoreCommand::Get {
            cid,
            output,
            peer,
            decrypt,
        } => {
            let key = decrypt.then(|| global.encryption_key()).transpose()?;
            get(&store, &cid, output, peer, key.as_ref(), cancel).await
        }
        StoreCommand::Pin { cid } => pin(&store, &cid),
        StoreCommand::Unpin { cid } => unpin(&store, &cid),
        StoreCommand::Pins => list_pins(&store),
        StoreCommand::Stat => stat(&store, global),
        StoreCommand::Export { cid, output } => export(&store, &cid, output),
        StoreCommand::Import { file } => import(&store, file),
        StoreCommand::Keygen => {
            println!("{}", hex::encode(ContentKey::generate().as_bytes()));
            Ok(())
        }
        StoreCommand::Serve { connect } => serve(&store, global, connect, cancel).await,
    };
    store.flush()?;
    result
}

pub(crate) fn parse_cid(s: &str) -> Result<ContentId> {
    s.parse::<ContentId>()
        .with_context(|| format!("Invalid content identifier: {}", s))
}

fn add(store: &ContentStore, file: PathBuf, key: Option<&ContentKey>) -> Result<()> {
    let added = match key {
        Some(key) => store.add_file_encrypted(&file, key),
        None => store.add_file(&file),
    }
    .with_context(|| format!("Failed to add {}", file.display()))?;

    let note = if added.already_present {
        " (already stored)".bright_black().to_string()
    } else {
        String::new()
    };
    println!("{}  Added {}{}", "✓".green().bold(), file.display(), note);
    println!("    CID:    {}", added.cid.to_string().bright_yellow());
    println!("    Size:   {} bytes", added.size.to_string().bright_cyan());
    println!("    Blocks: {}", added.block_count.to_string().bright_cyan());
    println!("    SHA256: {}", added.digest.to_string().bright_black());
    if key.is_some() {
        println!("    Sealed: {}", ENCRYPTION_ALGORITHM.green());
    }
    Ok(())
}

async fn get(
    store: &ContentStore,
    cid: &str,
    output: Option<PathBuf>,
    peer: Option<String>,
    key: Option<&ContentKey>,
    cancel: &CancellationToken,
) -> Result<()> {
    let cid = parse_cid(cid)?;

    let data = match (store.get(&cid), peer) {
        (Ok(data), _) => data,
        (Err(StoreError::NotFound(_)), Some(peer)) => {
            store.connect_to_peer(&peer, cancel).await?;
            let fetched = store.fetch(&cid, cancel).await?;
            eprintln!("Fetched {} blocks from {}", fetched, peer);
            store.get(&cid)?
        }
        (Err(e), _) => return Err(e.into()),
    };
    let data = match key {
        Some(key) => steward_store::crypto::open(key, &data)?,
        None => data,
    };

    match output {
        Some(path) => {
            fs::write(&path, &data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{}  Wrote {} bytes to {}",
                "✓".green().bold(),
                data.len(),
                path.display()
            );
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }
    }
    Ok(())
}

fn pin(store: &ContentStore, cid: &str) -> Result<()> {
    let cid = parse_cid(cid)?;
    store.pin(&cid)?;
    println!("{}  Pinned {}", "✓".green().bold(), cid.to_string().bright_yellow());
    Ok(())
}

fn unpin(store: &ContentStore, cid: &str) -> Result<()> {
    let cid = parse_cid(cid)?;
    if store.unpin(&cid)? {
        println!("{}  Unpinned {}", "✓".green().bold(), cid.to_string().bright_yellow());
    } else {
        println!("{} was not pinned", cid.to_string().bright_black());
    }
    Ok(())
}

fn list_pins(store: &ContentStore) -> Result<()> {
    let pins = store.pins()?;
    if pins.is_empty() {
        println!("{}", "No pinned content".bright_black());
        return Ok(());
    }

    println!("{}", "Pinned content:".bold().cyan());
    println!();
    for (cid, size) in pins {
        println!("  {}  {} bytes", cid.to_string().bright_yellow(), size);
    }
    Ok(())
}

fn stat(store: &ContentStore, global: &GlobalArgs) -> Result<()> {
    let stat = store.stat()?;
    println!("{}", "Repository:".bold().cyan());
    println!();
    println!("  Peer ID:  {}", store.peer_id().to_string().bright_yellow());
    println!("  Blocks:   {}", stat.blocks.to_string().bright_cyan());
    println!("  Stored:   {} bytes", stat.stored_bytes.to_string().bright_cyan());
    println!("  Pinned:   {}", stat.pinned.to_string().bright_cyan());
    println!(
        "  Pinning:  {}",
        if store.config().enable_pinning {
            "enabled".green()
        } else {
            "disabled".bright_black()
        }
    );
    println!("  Listen:   {}", global.listen.join(", ").bright_black());
    println!("  Gateway:  {}", global.gateway.join(", ").bright_black());
    Ok(())
}

fn export(store: &ContentStore, cid: &str, output: PathBuf) -> Result<()> {
    let cid = parse_cid(cid)?;
    let archive = store.export_archive(&cid)?;
    fs::write(&output, &archive)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "{}  Exported {} ({} bytes) to {}",
        "✓".green().bold(),
        cid.to_string().bright_yellow(),
        archive.len(),
        output.display()
    );
    Ok(())
}

fn import(store: &ContentStore, file: PathBuf) -> Result<()> {
    let bytes = fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let roots = store.import_archive(&bytes)?;
    println!("{}  Imported {}", "✓".green().bold(), file.display());
    for root in roots {
        println!("    Root: {}", root.to_string().bright_yellow());
    }
    Ok(())
}

async fn serve(
    store: &ContentStore,
    global: &GlobalArgs,
    connect: Vec<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    println!("{}", "Serving content store...".bold().cyan());
    println!();
    for addr in &global.listen {
        let bound = store.listen(addr, cancel.clone()).await?;
        println!("  Listening: {}", bound.to_string().bright_yellow());
    }
    for peer in connect {
        match store.connect_to_peer(&peer, cancel).await {
            Ok(peer_id) => println!("  {}  Connected {}", "✓".green().bold(), peer_id),
            Err(e) => println!("  {}  {}: {}", "✗".red().bold(), peer, e),
        }
    }
    println!();
    println!("{}", "Press Ctrl-C to stop".bright_black());

    cancel.cancelled().await;
    println!("Stopped; {} peers connected", store.peers().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_store::StoreConfig;

    #[test]
    fn test_add_then_export_and_import() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.bin");
        let data: Vec<u8> = (0..300 * 1024).map(|i| (i % 7) as u8).collect();
        fs::write(&file, &data).unwrap();

        let source = ContentStore::open(StoreConfig::at(dir.path().join("a"))).unwrap();
        add(&source, file, None).unwrap();
        let (cid, _) = source.pins().unwrap()[0];

        let archive = dir.path().join("session.car");
        export(&source, &cid.to_string(), archive.clone()).unwrap();

        let target = ContentStore::open(StoreConfig::at(dir.path().join("b"))).unwrap();
        import(&target, archive).unwrap();
        assert_eq!(target.get(&cid).unwrap(), data);
        assert!(target.is_pinned(&cid).unwrap());
    }

    #[tokio::test]
    async fn test_encrypted_add_then_decrypting_get() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.bin");
        fs::write(&file, b"raw eeg samples").unwrap();

        let store = ContentStore::open(StoreConfig::at(dir.path().join("repo"))).unwrap();
        let key = ContentKey::generate();
        add(&store, file, Some(&key)).unwrap();
        let (cid, size) = store.pins().unwrap()[0];
        assert_ne!(size, 15);

        let out = dir.path().join("out.bin");
        let cancel = CancellationToken::new();
        get(&store, &cid.to_string(), Some(out.clone()), None, Some(&key), &cancel)
            .await
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"raw eeg samples");

        let other = ContentKey::generate();
        assert!(get(&store, &cid.to_string(), Some(out), None, Some(&other), &cancel)
            .await
            .is_err());
    }

    #[test]
    fn test_parse_cid_rejects_garbage() {
        assert!(parse_cid("not-a-cid").is_err());
    }
}
