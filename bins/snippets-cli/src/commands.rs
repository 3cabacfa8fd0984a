// CLI commands for managing the snippet runner
use anyhow::{bail, Context, Result};
use snippets_common::config::{LanguageEntry, ServiceConfig};
use snippets_common::redis;
use snippets_common::types::{FileMetadata, InboundEvent};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Load the service config for editing; a missing file starts empty
fn load_service_config(config_path: &Path) -> Result<ServiceConfig> {
    if !config_path.exists() {
        return Ok(ServiceConfig::default());
    }
    ServiceConfig::load(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))
}

/// Save the service config
fn save_service_config(config_path: &Path, config: &ServiceConfig) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config)
        .context("Failed to serialize service config")?;
    fs::write(config_path, json_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    Ok(())
}

/// Starting language table for a fresh project
pub fn sample_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    let entries = [
        ("python", "python:3-alpine", "python -u {file}", None),
        ("javascript", "node:20-alpine", "node {file}", None),
        ("shell", "alpine:3", "sh {file}", Some(5)),
        ("ruby", "ruby:3-alpine", "ruby {file}", None),
        ("php", "php:8-cli-alpine", "php {file}", None),
    ];

    for (name, image, command, timeout) in entries {
        config.languages.insert(
            name.to_string(),
            LanguageEntry {
                timeout,
                image: Some(image.to_string()),
                command: Some(command.to_string()),
                ..Default::default()
            },
        );
    }
    config
}

/// Add a new language entry
pub async fn add_language(
    config_path: &Path,
    name: &str,
    image: &str,
    command: &str,
    timeout: Option<u64>,
    memory: Option<u64>,
    crop: Option<usize>,
) -> Result<()> {
    println!("🚀 Adding language: {}", name);

    let mut config = load_service_config(config_path)?;

    if config.languages.contains_key(name) {
        bail!("Language '{}' already exists in {}", name, config_path.display());
    }

    config.languages.insert(
        name.to_string(),
        LanguageEntry {
            timeout,
            crop,
            memory,
            image: Some(image.to_string()),
            command: Some(command.to_string()),
        },
    );

    // Validate before touching the file
    config
        .language_table()
        .with_context(|| format!("Invalid entry for '{}'", name))?;

    println!("📝 Updating {}...", config_path.display());
    save_service_config(config_path, &config)?;

    println!("✅ Language '{}' added successfully!", name);
    println!("\n📋 Next steps:");
    println!("  1. Pull the image: docker pull {}", image);
    println!("  2. Restart the worker to pick up the change");

    Ok(())
}

pub async fn remove_language(config_path: &Path, name: &str, yes: bool) -> Result<()> {
    println!("🗑️  Removing language: {}", name);

    let mut config = load_service_config(config_path)?;

    if !config.languages.contains_key(name) {
        bail!("Language '{}' not found in config", name);
    }

    // Confirm deletion
    if !yes {
        print!("⚠️  This will remove '{}' from {}\n", name, config_path.display());
        print!("\nContinue? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    config.languages.remove(name);
    println!("📝 Removing from {}...", config_path.display());
    save_service_config(config_path, &config)?;

    println!("✅ Language '{}' removed successfully!", name);
    Ok(())
}

/// List all configured languages with their effective limits
pub async fn list_languages(config_path: &Path) -> Result<()> {
    let config = load_service_config(config_path)?;
    let table = config.language_table()?;

    if table.languages().is_empty() {
        println!("No languages configured.");
        println!("\n💡 Add a language with: snippets-cli add-lang --name <name> --image <image> --command <command>");
        return Ok(());
    }

    println!("📋 Configured Languages:\n");
    println!("{:<12} {:<22} {:<28} {:<9} {:<8} {:<6}",
             "Name", "Image", "Command", "Timeout", "Memory", "Crop");
    println!("{}", "─".repeat(90));

    for name in table.languages() {
        let profile = table.resolve(name)?;
        println!("{:<12} {:<22} {:<28} {:<9} {:<8} {:<6}",
                 profile.name,
                 profile.image,
                 profile.command.as_str(),
                 format!("{}s", profile.timeout_seconds),
                 format!("{}MB", profile.memory_limit_mb),
                 profile.crop_length);
    }

    println!("\n✅ Total: {} language(s)", table.languages().len());

    Ok(())
}

/// Dry run: print the limits a language would run with, without running anything
pub async fn show_limits(config_path: &Path, name: &str) -> Result<()> {
    let config = load_service_config(config_path)?;
    let table = config.language_table()?;

    println!("{}", table.describe(name));
    Ok(())
}

pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing snippet runner at: {}", path);

    let project_path = Path::new(path);
    let config = sample_config();

    let dirs = [Path::new("config"), config.folder.as_path()];
    for dir in &dirs {
        let dir_path = project_path.join(dir);
        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        println!("  ✅ Created: {}", dir.display());
    }

    let config_path = project_path.join("config/snippets.json");
    if config_path.exists() {
        println!("  ⏭️  Kept existing: config/snippets.json");
    } else {
        save_service_config(&config_path, &config)?;
        println!("  ✅ Created: config/snippets.json");
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Set SNIPPETS_TOKEN and SNIPPETS_BOT_ID");
    println!("  2. Start Redis and the worker: snippets-worker");

    Ok(())
}

async fn connect(redis_url: &str) -> Result<::redis::aio::ConnectionManager> {
    let client = ::redis::Client::open(redis_url)
        .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))
}

/// Build the event a shared file produces
pub fn file_shared_event(
    file_id: &str,
    name: &str,
    url: &str,
    language: &str,
    reply_target: &str,
) -> InboundEvent {
    InboundEvent::FileShared {
        file: FileMetadata {
            id: file_id.to_string(),
            name: name.to_string(),
            filetype: language.to_string(),
            url_private_download: url.to_string(),
        },
        reply_target: reply_target.to_string(),
    }
}

/// Enqueue a shared file for the worker, as the chat collaborator would
pub async fn submit(redis_url: &str, event: InboundEvent) -> Result<()> {
    let mut conn = connect(redis_url).await?;
    redis::push_event(&mut conn, &event)
        .await
        .context("Failed to enqueue event")?;

    println!("✅ Event queued on {}", redis::INBOX_KEY);
    println!("💡 Replies arrive on {}", redis::OUTBOX_KEY);
    Ok(())
}

/// Enqueue a re-run trigger for a previously shared file
pub async fn rerun(redis_url: &str, user: &str, file_id: &str, reaction: &str) -> Result<()> {
    let mut conn = connect(redis_url).await?;

    if redis::load_file(&mut conn, file_id).await?.is_none() {
        println!("⚠️  No metadata stored for {}, the worker will reply that it is gone", file_id);
    }

    let event = InboundEvent::ReactionAdded {
        user: user.to_string(),
        file_id: file_id.to_string(),
        reaction: reaction.to_string(),
    };
    redis::push_event(&mut conn, &event)
        .await
        .context("Failed to enqueue re-run")?;

    println!("🔁 Re-run of {} queued", file_id);
    Ok(())
}
