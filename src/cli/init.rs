//! projectflow init command implementation
//!
//! Creates a bare repository with an initial mainline commit and writes the
//! default `.projectflow.toml` next to it.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Config, CONFIG_FILE_NAME};
use crate::error::{Error, Result};
use crate::git::GitRepositoryService;
use crate::output::{emit_success, HumanOutput, OutputOptions};

#[derive(Serialize)]
struct InitReport {
    repo: PathBuf,
    mainline: String,
    created_config: bool,
}

pub fn run(repo: Option<PathBuf>, mainline: Option<String>, output: OutputOptions) -> Result<()> {
    let path = match repo {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    if path.join("HEAD").exists() {
        return Err(Error::InvalidArgument(format!(
            "{} already holds a repository",
            path.display()
        )));
    }

    let mut config = Config::load_from_repo(&path);
    if let Some(mainline) = mainline {
        config.mainline = mainline;
    }
    config.validate()?;

    GitRepositoryService::init_bare(&path, &config.mainline, config.author.clone())?;

    let config_path = path.join(CONFIG_FILE_NAME);
    let created_config = !config_path.exists();
    if created_config {
        config.save(&config_path)?;
    }

    let report = InitReport {
        repo: path.clone(),
        mainline: config.mainline.clone(),
        created_config,
    };

    let mut human = HumanOutput::new(format!("Initialized repository at {}", path.display()));
    human.push_summary("mainline", config.mainline.clone());
    if created_config {
        human.push_summary("created", CONFIG_FILE_NAME);
    }
    human.push_next_step("projectflow ws new <id> --user <user>");

    emit_success(output, "init", &report, Some(&human))
}
