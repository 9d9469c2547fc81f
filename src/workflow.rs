//! The update state machine:
//!
//! `Start -> BackedUp -> Merged -> Validated -> Installed`, or
//! `Merged -> Invalid -> RolledBack` when validation fails. Nothing is
//! written to the live path before `BackedUp`.

use crate::backup::{create_backup, Backup};
use crate::config::Config;
use crate::error::{Stage, UpdateError, ValidationError};
use crate::install::{install, rollback};
use crate::merge::{MergeEngine, OverrideMerge};
use crate::snippet::{build_snippet, mask_token};
use crate::validate::validate;
use std::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Start,
    BackedUp,
    Merged,
    Validated,
    Installed,
    Invalid,
    RolledBack,
}

impl UpdateState {
    pub fn can_advance_to(self, next: UpdateState) -> bool {
        use UpdateState::*;
        matches!(
            (self, next),
            (Start, BackedUp)
                | (BackedUp, Merged)
                | (BackedUp, Invalid)
                | (Merged, Validated)
                | (Merged, Invalid)
                | (Validated, Installed)
                | (Invalid, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UpdateState::Installed | UpdateState::RolledBack)
    }
}

#[derive(Debug)]
pub struct UpdateReport {
    /// `None` when there was no live file to snapshot.
    pub backup: Option<Backup>,
    pub state: UpdateState,
    pub warnings: Vec<String>,
}

pub struct Updater<M = OverrideMerge> {
    cfg: Config,
    engine: M,
}

impl Updater<OverrideMerge> {
    pub fn new(cfg: Config) -> Self {
        Self { cfg, engine: OverrideMerge }
    }
}

impl<M: MergeEngine> Updater<M> {
    pub fn with_engine(cfg: Config, engine: M) -> Self {
        Self { cfg, engine }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Write new credentials into the live configuration.
    pub fn update(&self, bot_token: &str, chat_id: &str) -> Result<UpdateReport, UpdateError> {
        let snippet = build_snippet(bot_token, chat_id)?;
        info!("updating {} (token {})", self.cfg.config_path.display(), mask_token(bot_token));

        let mut state = UpdateState::Start;
        let mut warnings = Vec::new();

        let backup = create_backup(&self.cfg.config_path, &self.cfg.backup_dir, &self.cfg.hash_alg, &mut warnings)?;
        advance(&mut state, UpdateState::BackedUp);

        // Merge from the snapshot so the installed result and the rollback
        // target derive from the same bytes.
        let base = match &backup {
            Some(b) => fs::read(&b.path).map_err(|e| UpdateError::io(Stage::Merge, &b.path, e))?,
            None => Vec::new(),
        };

        let merged = match self.engine.merge(&base, &snippet.to_value()) {
            Ok(m) => m,
            Err(cause) => return Err(self.abort(&mut state, cause, backup.as_ref())),
        };
        advance(&mut state, UpdateState::Merged);

        if let Err(cause) = validate(&merged, chat_id) {
            return Err(self.abort(&mut state, cause, backup.as_ref()));
        }
        advance(&mut state, UpdateState::Validated);

        warnings.extend(install(&merged, &self.cfg.config_path, backup.as_ref())?);
        advance(&mut state, UpdateState::Installed);

        Ok(UpdateReport { backup, state, warnings })
    }

    fn abort(&self, state: &mut UpdateState, cause: ValidationError, backup: Option<&Backup>) -> UpdateError {
        warn!("validation failed: {cause}");
        advance(state, UpdateState::Invalid);
        match rollback(&self.cfg.config_path, backup) {
            Ok((rolled_back, warnings)) => {
                advance(state, UpdateState::RolledBack);
                UpdateError::Validation { cause, rolled_back, warnings }
            }
            Err(source) => UpdateError::RollbackFailed {
                cause,
                // rollback only fails when there is a backup to read
                backup: backup.map(|b| b.path.clone()).unwrap_or_default(),
                source,
            },
        }
    }
}

fn advance(state: &mut UpdateState, next: UpdateState) {
    debug_assert!(state.can_advance_to(next), "{state:?} -> {next:?}");
    debug!("update state {:?} -> {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::UpdateState::*;

    #[test]
    fn backed_up_cannot_be_skipped() {
        assert!(!Start.can_advance_to(Merged));
        assert!(!Start.can_advance_to(Installed));
        assert!(!Start.can_advance_to(Invalid));
        assert!(Start.can_advance_to(BackedUp));
    }

    #[test]
    fn only_installed_and_rolled_back_are_terminal() {
        let all = [Start, BackedUp, Merged, Validated, Installed, Invalid, RolledBack];
        let terminal: Vec<_> = all.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, [Installed, RolledBack]);
        for t in terminal {
            assert!(all.iter().all(|n| !t.can_advance_to(*n)));
        }
    }
}
