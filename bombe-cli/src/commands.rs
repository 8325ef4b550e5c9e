//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::SessionAction;
use crate::TaskAction;
use bombe_core::config::{BombeConfig, WORKSPACE_CONFIG_FILE, load_config};
use bombe_core::{DirKind, LanguagePair, Session, SessionId, SessionStore};
use bombe_lab::corpus::{export_and_clean, load_corpus};
use bombe_lab::layout::FoldLayout;
use bombe_lab::logparse::duration_hours;
use bombe_lab::monitor::{LogMonitor, default_roots};
use bombe_lab::publish::publish_model;
use bombe_lab::splitting::{self, GroupLabels};
use bombe_lab::training::TrainingOrchestrator;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Session { action } => handle_session(action, workspace),
        Commands::Tasks { action } => handle_tasks(action, workspace).await,
        Commands::Monitor { roots, once } => handle_monitor(roots, once, workspace).await,
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<(BombeConfig, SessionStore)> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    let store = SessionStore::new(config.registry_path());
    Ok((config, store))
}

fn split_key(fold: u32) -> String {
    format!("split_{fold:02}")
}

fn print_session(session: &Session, is_current: bool) {
    let marker = if is_current { " (current)" } else { "" };
    println!("Session: {session}{marker}");
    println!("Created: {}", session.created.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(comment) = &session.comment {
        println!("Comment: {comment}");
    }
    println!("Language pair: {}", session.langs());
    println!(
        "Labels: classified '{}', unclassified '{}'",
        session.settings.classified_label, session.settings.unclassified_label
    );
    println!("Data: {}", session.settings.data_dir.display());
    let paths = session.paths();
    println!("Directories:");
    for kind in DirKind::ALL {
        println!("  {:<9} {}", kind.as_str(), paths.dir(kind).display());
    }
    match session.progress() {
        0 => println!("Last fold trained: none"),
        fold => {
            println!("Last fold trained: {fold}");
            println!("  models: {}", paths.fold_dir(DirKind::Models, fold).display());
            println!("  logs:   {}", paths.fold_dir(DirKind::Logs, fold).display());
        }
    }
}

fn handle_session(action: SessionAction, workspace: &Path) -> anyhow::Result<()> {
    let (config, store) = load(workspace)?;
    match action {
        SessionAction::New { langs, comment } => {
            let langs: LanguagePair = langs.as_deref().unwrap_or(&config.corpus.langs).parse()?;
            let session = store.create(langs, comment, config.session_settings())?;
            println!("{session}");
            Ok(())
        }
        SessionAction::List { limit, all } => {
            let listings = store.list(limit, all)?;
            if listings.is_empty() {
                println!("No training sessions.");
            }
            for listing in listings {
                let marker = if listing.is_current { "*" } else { " " };
                let session = &listing.session;
                println!(
                    "{marker} {:<22} {}  folds {:>2}  {}",
                    session.to_string(),
                    session.created.format("%Y-%m-%d %H:%M"),
                    session.progress(),
                    session.comment.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        SessionAction::Use { id, force } => {
            let existing = store.find(&id)?;
            let session = match existing {
                Some(_) if !force => store.activate(&id)?,
                _ => {
                    let id: SessionId = id.parse()?;
                    store.create_with_id(id, None, config.session_settings())?
                }
            };
            println!("Using training session {session}");
            Ok(())
        }
        SessionAction::Get => {
            println!("{}", store.get_current()?);
            Ok(())
        }
        SessionAction::End => {
            let session = store.get_current()?;
            store.end(&session)?;
            println!("Ended training session {session}");
            Ok(())
        }
        SessionAction::Annotate { comment } => {
            let mut session = store.get_current()?;
            store.annotate(&mut session, comment)?;
            Ok(())
        }
        SessionAction::View { id } => {
            let session = store.load_or_current(id.as_deref())?;
            let is_current = store
                .find(bombe_core::CURRENT_KEY)?
                .is_some_and(|current| current.id == session.id);
            print_session(&session, is_current);
            Ok(())
        }
        SessionAction::Rm { id } => {
            let session = store.delete(&id)?;
            println!("Deleted training session {session}");
            Ok(())
        }
        SessionAction::Duration { fold } => {
            let session = store.get_current()?;
            let log = FoldLayout::new(&session, fold)?.log;
            let hours = if log.is_file() {
                duration_hours(&log)?
            } else {
                None
            };
            println!("{}", hours.unwrap_or(-1.0));
            Ok(())
        }
        SessionAction::Results { summarize } => {
            let session = store.get_current()?;
            let results: BTreeMap<String, _> = session
                .results()
                .iter()
                .map(|(fold, result)| {
                    let result = if summarize {
                        result.summarized()
                    } else {
                        result.clone()
                    };
                    (split_key(*fold), result)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        SessionAction::Scores => {
            let session = store.get_current()?;
            let scores: BTreeMap<String, BTreeMap<&str, f64>> = session
                .results()
                .iter()
                .map(|(fold, result)| {
                    let scores = result
                        .scores
                        .iter()
                        .map(|(name, metric)| (name.as_str(), metric.score))
                        .collect();
                    (split_key(*fold), scores)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&scores)?);
            Ok(())
        }
        SessionAction::Dir { kind, fold } => {
            let session = store.get_current()?;
            let paths = session.paths();
            let dir = match fold {
                Some(fold) => paths.fold_path(kind, fold, &[])?,
                None => paths.resolve(kind)?,
            };
            println!("{}", dir.display());
            Ok(())
        }
    }
}

async fn handle_tasks(action: TaskAction, workspace: &Path) -> anyhow::Result<()> {
    let (config, store) = load(workspace)?;
    let mut session = store.get_current()?;
    match action {
        TaskAction::ExportAndClean => {
            let export_dir = session.paths().resolve(DirKind::Export)?;
            let reports = export_and_clean(
                &session.settings.data_dir,
                &export_dir,
                session.langs(),
                config.pool.workers,
            )
            .await?;
            for report in &reports {
                println!(
                    "{} -> {} ({} of {} rows kept)",
                    report.input.display(),
                    report.output.display(),
                    report.rows_kept,
                    report.rows_read
                );
            }
            Ok(())
        }
        TaskAction::SplitCorpus {
            k,
            test_fraction,
            seed,
        } => {
            let paths = session.paths();
            let corpus = load_corpus(&paths.resolve(DirKind::Export)?)?;
            let labels = GroupLabels::new(
                session.settings.classified_label.as_str(),
                session.settings.unclassified_label.as_str(),
            );
            let outcome = splitting::split(
                &corpus,
                &labels,
                k.unwrap_or(config.split.k),
                test_fraction.unwrap_or(config.split.test_fraction),
                seed.unwrap_or(config.split.seed),
            )?;
            let work_dir = paths.resolve(DirKind::Work)?;
            let written = splitting::save(&outcome, session.langs(), &work_dir)?;
            println!(
                "Wrote {} files for {} folds and {} test rows to {}",
                written.len(),
                outcome.folds.len(),
                outcome.test.len(),
                work_dir.display()
            );
            Ok(())
        }
        TaskAction::Train => {
            let orchestrator = TrainingOrchestrator::from_config(&config);
            let state = orchestrator.run(&store, &mut session).await?;
            println!("{session}: {state:?} after fold {}", session.progress());
            Ok(())
        }
        TaskAction::Score { fold, save } => {
            let orchestrator = TrainingOrchestrator::from_config(&config);
            let result = orchestrator.score_fold(&store, &mut session, fold, save).await?;
            println!("{}", serde_json::to_string_pretty(&result.scores)?);
            Ok(())
        }
        TaskAction::PublishModel {
            name,
            config_models_dir,
            dest_root,
        } => {
            let published = publish_model(&session, &name, &config_models_dir, &dest_root)?;
            println!(
                "Published fold {} (BLEU {:.2})",
                published.fold, published.bleu
            );
            println!("Path: {}", published.decoder_config.display());
            Ok(())
        }
    }
}

async fn handle_monitor(roots: Vec<PathBuf>, once: bool, workspace: &Path) -> anyhow::Result<()> {
    let (config, store) = load(workspace)?;
    let roots = if roots.is_empty() {
        default_roots(&store, &config.experiments_dir)?
    } else {
        roots
    };
    let mut monitor = LogMonitor::with_jsonl_sinks(roots, config.monitor.clone());
    if once {
        let summary = monitor.poll_once();
        println!(
            "{} jobs, {} lines, {} points, {} failures",
            summary.jobs, summary.lines, summary.points, summary.failed
        );
    } else {
        monitor
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&BombeConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let (config, _) = load(workspace)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
