//! Publishing the best fold's model for serving.

use crate::engine::EngineFileConfig;
use crate::error::LabError;
use crate::layout::{FoldLayout, MODEL_FILENAME};
use bombe_core::Session;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a published model ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub fold: u32,
    pub bleu: f64,
    pub dir: PathBuf,
    pub decoder_config: PathBuf,
}

fn first_path(config: &EngineFileConfig, key: &str, source: &Path) -> Result<PathBuf, LabError> {
    config.paths(key).into_iter().next().ok_or_else(|| {
        LabError::Publish(format!("{} has no '{key}' entry", source.display()))
    })
}

/// Copy the highest-BLEU fold's model and vocabulary into
/// `dest_root/name`, with a decoder config pointing at
/// `config_models_dir/name` where the serving side will mount them.
pub fn publish_model(
    session: &Session,
    name: &str,
    config_models_dir: &Path,
    dest_root: &Path,
) -> Result<Published, LabError> {
    let (fold, bleu) = session
        .best_fold("BLEU")
        .ok_or_else(|| LabError::scoring(format!("session {session} has no BLEU scores")))?;
    let layout = FoldLayout::new(session, fold)?;
    let mut decoder = EngineFileConfig::load(&layout.decoder_config)?;
    let model = first_path(&decoder, "models", &layout.decoder_config)?;
    let vocab = first_path(&decoder, "vocabs", &layout.decoder_config)?;
    let vocab_name = vocab
        .file_name()
        .ok_or_else(|| LabError::MissingArtifact(vocab.clone()))?
        .to_owned();

    let dir = dest_root.join(name);
    std::fs::create_dir_all(&dir)?;
    std::fs::copy(&model, dir.join(MODEL_FILENAME))?;
    std::fs::copy(&vocab, dir.join(&vocab_name))?;

    let served = config_models_dir.join(name);
    let served_vocab = served.join(&vocab_name);
    decoder.set_paths("models", &[served.join(MODEL_FILENAME)]);
    decoder.set_paths("vocabs", &[&served_vocab, &served_vocab]);
    let decoder_config = dir.join(format!("{MODEL_FILENAME}.decoder.yml"));
    decoder.save(&decoder_config)?;

    info!(session = %session, fold, bleu, dir = %dir.display(), "Published model");
    Ok(Published {
        fold,
        bleu,
        dir,
        decoder_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bombe_core::{
        DirectoryTemplates, FoldResult, LanguagePair, MetricScore, SessionId, SessionSettings,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn scored(bleu: f64) -> FoldResult {
        FoldResult::new(BTreeMap::from([("BLEU".to_string(), MetricScore::new(bleu))]))
    }

    #[test]
    fn test_publishes_best_fold() {
        let dir = TempDir::new().unwrap();
        let settings = SessionSettings {
            directories: DirectoryTemplates::under(&dir.path().join("exp")),
            ..SessionSettings::default()
        };
        let mut session =
            Session::new(SessionId::new(LanguagePair::new("en", "cy"), "abc"), None, settings);
        session.record_result(1, scored(20.0)).unwrap();
        session.record_result(2, scored(31.5)).unwrap();

        let layout = FoldLayout::new(&session, 2).unwrap();
        std::fs::write(&layout.best_model, b"weights").unwrap();
        let vocab = layout.models_dir.parent().unwrap().join("vocab.en-cy.spm");
        std::fs::write(&vocab, b"pieces").unwrap();
        std::fs::write(
            &layout.decoder_config,
            format!(
                "models:\n  - {}\nvocabs:\n  - {}\n  - {}\nbeam-size: 6\n",
                layout.best_model.display(),
                vocab.display(),
                vocab.display()
            ),
        )
        .unwrap();

        let published = publish_model(
            &session,
            "en-cy-v1",
            Path::new("/srv/models"),
            &dir.path().join("dist"),
        )
        .unwrap();
        assert_eq!((published.fold, published.bleu), (2, 31.5));
        assert_eq!(std::fs::read(published.dir.join("model.npz")).unwrap(), b"weights");
        assert!(published.dir.join("vocab.en-cy.spm").is_file());

        let config = EngineFileConfig::load(&published.decoder_config).unwrap();
        assert_eq!(
            config.paths("models"),
            vec![PathBuf::from("/srv/models/en-cy-v1/model.npz")]
        );
        assert_eq!(
            config.paths("vocabs"),
            vec![PathBuf::from("/srv/models/en-cy-v1/vocab.en-cy.spm"); 2]
        );
        assert_eq!(config.get("beam-size").and_then(|v| v.as_u64()), Some(6));
    }

    #[test]
    fn test_requires_scored_folds() {
        let dir = TempDir::new().unwrap();
        let settings = SessionSettings {
            directories: DirectoryTemplates::under(dir.path()),
            ..SessionSettings::default()
        };
        let session =
            Session::new(SessionId::new(LanguagePair::new("en", "cy"), "abc"), None, settings);
        let err = publish_model(&session, "m", Path::new("/srv"), dir.path()).unwrap_err();
        assert!(matches!(err, LabError::Scoring(_)));
    }
}
