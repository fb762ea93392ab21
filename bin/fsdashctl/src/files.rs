//! ---
//! fsd_section: "05-networking-external-interfaces"
//! fsd_subsection: "binary"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "File and audit trail subcommands for the dashboard control CLI."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use fsd_core::{AuditCategory, DashboardEngine};

use crate::render;

/// Dispatch entry point for file subcommands.
pub async fn run(engine: &DashboardEngine, command: FilesCommand) -> Result<()> {
    match command {
        FilesCommand::List => {
            let files = engine.list_files().await?;
            render::files(&files);
        }
        FilesCommand::Upload(cmd) => cmd.execute(engine).await?,
        FilesCommand::Download(cmd) => cmd.execute(engine).await?,
        FilesCommand::Delete { name } => {
            let receipt = engine.delete_file(&name).await?;
            println!(
                "{}",
                receipt
                    .message
                    .unwrap_or_else(|| format!("Deleted {name}"))
            );
            render::os_operations(&receipt.os_operations);
        }
    }
    Ok(())
}

/// Dispatch entry point for audit trail subcommands.
pub async fn run_logs(engine: &DashboardEngine, command: LogsCommand) -> Result<()> {
    match command {
        LogsCommand::Show { category } => {
            engine.refresh_now().await;
            let entries = engine.filter_audit(category);
            render::audit(&engine.audit_category(), &entries);
        }
        LogsCommand::Clear => {
            engine.clear_audit_log().await?;
            println!("Audit log cleared");
        }
    }
    Ok(())
}

#[derive(Debug, Subcommand)]
pub enum FilesCommand {
    /// List files on the server.
    #[command(name = "list")]
    List,
    /// Upload a local file under the WRITE lock.
    #[command(name = "upload")]
    Upload(UploadCommand),
    /// Download a file under a READ lock.
    #[command(name = "download")]
    Download(DownloadCommand),
    /// Delete a file from the server.
    #[command(name = "delete")]
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// Show the recent audit window, optionally filtered.
    #[command(name = "show")]
    Show {
        /// `all`, `failed`, or an operation name such as `upload`.
        #[arg(long, short = 'c', default_value = "all")]
        category: AuditCategory,
    },
    /// Clear the server's audit log.
    #[command(name = "clear")]
    Clear,
}

#[derive(Debug, Args)]
pub struct UploadCommand {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Name on the server; defaults to the local file name.
    #[arg(long, value_name = "NAME")]
    name: Option<String>,
}

impl UploadCommand {
    async fn execute(self, engine: &DashboardEngine) -> Result<()> {
        let name = match self.name {
            Some(name) => name,
            None => self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", self.path.display()))?,
        };
        let content = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("unable to read {}", self.path.display()))?;
        let receipt = engine.upload_file(&name, content).await?;
        println!(
            "{}",
            receipt
                .message
                .unwrap_or_else(|| format!("Uploaded {name}"))
        );
        render::os_operations(&receipt.os_operations);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DownloadCommand {
    #[arg(value_name = "NAME")]
    name: String,

    /// Where to write the content; defaults to the server name in the current directory.
    #[arg(long, short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,
}

impl DownloadCommand {
    async fn execute(self, engine: &DashboardEngine) -> Result<()> {
        let content = engine.download_file(&self.name).await?;
        let output = self.output.unwrap_or_else(|| PathBuf::from(&self.name));
        tokio::fs::write(&output, &content)
            .await
            .with_context(|| format!("unable to write {}", output.display()))?;
        println!(
            "Downloaded {} ({}) to {}",
            self.name,
            fsd_common::format_bytes(content.len() as u64),
            output.display()
        );
        Ok(())
    }
}
