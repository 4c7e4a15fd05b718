//! Decision engine
//!
//! A [`Planner`] assigns exactly one [`Decision`] to each key. It must be
//! fed keys in descending key-length order: a folder can only be decided
//! once all of its descendants have been, because a surviving descendant
//! forces the folder to survive as well. That "must survive" knowledge is
//! the kept-folder set, owned by the planner for the duration of one pass.
//!
//! File decisions compare four timestamps (absent = -1). The greatest wins;
//! ties resolve in the fixed order local mtime, remote mtime, local deletion,
//! remote deletion.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use tidesync_core::domain::{
    Decision, DecisionRule, DecisionTrace, DomainError, LocalEntity, MixedState, SizeCheck,
    SyncKey,
};

/// On-disk creation and modification times of local folders
pub trait FolderStatProvider {
    /// Returns `(ctime, mtime)` for a local folder, if it exists
    fn folder_times(&self, key: &SyncKey) -> Option<(i64, i64)>;
}

/// Folder times taken from the local listing of the run
#[derive(Debug, Default, Clone)]
pub struct ListedFolderTimes {
    times: HashMap<SyncKey, (i64, i64)>,
}

impl ListedFolderTimes {
    pub fn from_entities<'a>(entities: impl IntoIterator<Item = &'a LocalEntity>) -> Self {
        let times = entities
            .into_iter()
            .filter(|e| e.key.is_folder())
            .map(|e| (e.key.clone(), (e.ctime, e.mtime)))
            .collect();
        Self { times }
    }
}

impl FolderStatProvider for ListedFolderTimes {
    fn folder_times(&self, key: &SyncKey) -> Option<(i64, i64)> {
        self.times.get(key).copied()
    }
}

/// Stateful decision pass over one sorted key sequence
#[derive(Debug)]
pub struct Planner {
    kept_folders: HashSet<SyncKey>,
    size_limit: Option<u64>,
    encrypted: bool,
}

impl Planner {
    /// `size_limit <= 0` disables the size limit
    pub fn new(size_limit: i64, encrypted: bool) -> Self {
        Self {
            kept_folders: HashSet::new(),
            size_limit: u64::try_from(size_limit).ok().filter(|l| *l > 0),
            encrypted,
        }
    }

    /// Folders that some already-decided descendant requires
    pub fn kept_folders(&self) -> &HashSet<SyncKey> {
        &self.kept_folders
    }

    pub fn decide(
        &mut self,
        state: &mut MixedState,
        stats: &dyn FolderStatProvider,
    ) -> Result<Decision, DomainError> {
        if state.is_folder() {
            self.decide_folder(state, stats)
        } else {
            self.decide_file(state)
        }
    }

    pub fn decide_file(&mut self, state: &mut MixedState) -> Result<Decision, DomainError> {
        state.check_consistency(self.encrypted)?;
        let inputs = state.trace_inputs();
        let (ml, mr, dl, dr) = (
            inputs.mtime_local,
            inputs.mtime_remote,
            inputs.deltime_local,
            inputs.deltime_remote,
        );
        let local_size = state.size_local_enc.or(state.size_local);
        let remote_size = state.size_remote_enc.or(state.size_remote);
        let over = |size: Option<u64>, exists: bool| match self.size_limit {
            Some(limit) => exists && size.unwrap_or(0) > limit,
            None => false,
        };
        let local_over = over(local_size, state.exist_local);
        let remote_over = over(remote_size, state.exist_remote);
        let limited = self.size_limit.is_some();

        let (decision, rule, size_check) = if state.exist_local && ml >= mr && ml >= dl && ml >= dr
        {
            self.keep_parent(&state.key);
            if ml == mr {
                let rule = DecisionRule::LocalMtimeEqualsRemote;
                if state.sizes_match() {
                    (Decision::SkipUploading, rule, SizeCheck::Unlimited)
                } else if !limited {
                    (Decision::UploadLocalToRemote, rule, SizeCheck::Unlimited)
                } else {
                    match (local_over, remote_over) {
                        (false, false) => {
                            (Decision::UploadLocalToRemote, rule, SizeCheck::WithinLimit)
                        }
                        (false, true) => (
                            Decision::ErrorRemoteTooLargeConflictLocal,
                            rule,
                            SizeCheck::RemoteTooLarge,
                        ),
                        (true, false) => (
                            Decision::ErrorLocalTooLargeConflictRemote,
                            rule,
                            SizeCheck::LocalTooLarge,
                        ),
                        (true, true) => (
                            Decision::SkipUploadingTooLarge,
                            rule,
                            SizeCheck::BothTooLarge,
                        ),
                    }
                }
            } else {
                let rule = DecisionRule::LocalMtimeNewest;
                if local_over {
                    (Decision::SkipUploadingTooLarge, rule, SizeCheck::LocalTooLarge)
                } else {
                    (Decision::UploadLocalToRemote, rule, limit_check(limited))
                }
            }
        } else if state.exist_remote && mr >= dl && mr >= dr {
            self.keep_parent(&state.key);
            let rule = DecisionRule::RemoteMtimeNewest;
            if remote_over {
                (Decision::SkipDownloadingTooLarge, rule, SizeCheck::RemoteTooLarge)
            } else {
                (Decision::DownloadRemoteToLocal, rule, limit_check(limited))
            }
        } else if dl > 0 && dl >= dr {
            let rule = DecisionRule::LocalDeletionNewest;
            match (local_over, remote_over) {
                (true, true) => (
                    Decision::SkipUsingLocalDelTooLarge,
                    rule,
                    SizeCheck::BothTooLarge,
                ),
                (true, false) if state.exist_remote => (
                    Decision::ErrorLocalTooLargeConflictRemote,
                    rule,
                    SizeCheck::LocalTooLarge,
                ),
                (true, false) => (
                    Decision::SkipUsingLocalDelTooLarge,
                    rule,
                    SizeCheck::LocalTooLarge,
                ),
                (false, true) if state.exist_local => (
                    Decision::ErrorRemoteTooLargeConflictLocal,
                    rule,
                    SizeCheck::RemoteTooLarge,
                ),
                (false, true) => (
                    Decision::SkipUsingLocalDelTooLarge,
                    rule,
                    SizeCheck::RemoteTooLarge,
                ),
                (false, false) => (
                    Decision::UploadLocalDelHistToRemote,
                    rule,
                    limit_check(limited),
                ),
            }
        } else if dr > 0 {
            let rule = DecisionRule::RemoteDeletionNewest;
            match (local_over, remote_over) {
                (true, true) => (
                    Decision::SkipUsingRemoteDelTooLarge,
                    rule,
                    SizeCheck::BothTooLarge,
                ),
                (false, true) if state.exist_local => (
                    Decision::ErrorRemoteTooLargeConflictLocal,
                    rule,
                    SizeCheck::RemoteTooLarge,
                ),
                (false, true) => (
                    Decision::SkipUsingRemoteDelTooLarge,
                    rule,
                    SizeCheck::RemoteTooLarge,
                ),
                (true, false) if state.exist_remote => (
                    Decision::ErrorLocalTooLargeConflictRemote,
                    rule,
                    SizeCheck::LocalTooLarge,
                ),
                (true, false) => (
                    Decision::SkipUsingRemoteDelTooLarge,
                    rule,
                    SizeCheck::LocalTooLarge,
                ),
                (false, false) => (Decision::KeepRemoteDelHist, rule, limit_check(limited)),
            }
        } else {
            return Err(DomainError::NoDecision(state.key.to_string()));
        };

        Ok(Self::assign(state, decision, rule, size_check))
    }

    pub fn decide_folder(
        &mut self,
        state: &mut MixedState,
        stats: &dyn FolderStatProvider,
    ) -> Result<Decision, DomainError> {
        state.check_consistency(self.encrypted)?;
        let inputs = state.trace_inputs();
        let (dl, dr) = (inputs.deltime_local, inputs.deltime_remote);

        let result = if self.kept_folders.contains(&state.key) {
            self.keep_folder(state, DecisionRule::FolderKeptByChildren)
        } else if state.deltime_local.is_some() || state.deltime_remote.is_some() {
            let cmtime = if state.exist_local {
                stats
                    .folder_times(&state.key)
                    .map(|(ctime, mtime)| ctime.max(mtime))
                    .unwrap_or(-1)
            } else {
                -1
            };
            let renamed_mtime = state.mtime_local.unwrap_or(-1);

            if cmtime > 0 && cmtime >= dl && cmtime >= dr {
                self.keep_folder(state, DecisionRule::FolderRecreatedAfterDeletion)
            } else if state.change_local_mtime_using_mapping
                && renamed_mtime > dl
                && renamed_mtime > dr
            {
                self.keep_folder(state, DecisionRule::FolderRenamedAfterDeletion)
            } else if dl > 0 && dl > dr {
                Ok(Self::assign(
                    state,
                    Decision::UploadLocalDelHistToRemoteFolder,
                    DecisionRule::FolderLocalDeletionNewer,
                    SizeCheck::Unlimited,
                ))
            } else {
                Ok(Self::assign(
                    state,
                    Decision::KeepRemoteDelHistFolder,
                    DecisionRule::FolderRemoteDeletionNewer,
                    SizeCheck::Unlimited,
                ))
            }
        } else {
            self.keep_folder(state, DecisionRule::FolderWithoutDeletions)
        };

        // Entries below this folder have all been decided by now.
        self.kept_folders.remove(&state.key);
        result
    }

    fn keep_folder(
        &mut self,
        state: &mut MixedState,
        rule: DecisionRule,
    ) -> Result<Decision, DomainError> {
        // A kept folder known only from tombstones is recreated on both sides.
        let decision = if state.exist_local && state.exist_remote {
            Decision::SkipFolder
        } else {
            Decision::CreateFolder
        };
        self.keep_parent(&state.key);
        Ok(Self::assign(state, decision, rule, SizeCheck::Unlimited))
    }

    fn keep_parent(&mut self, key: &SyncKey) {
        let parent = key.parent();
        if !parent.is_root() {
            self.kept_folders.insert(parent);
        }
    }

    fn assign(
        state: &mut MixedState,
        decision: Decision,
        rule: DecisionRule,
        size_check: SizeCheck,
    ) -> Decision {
        trace!(key = %state.key, %decision, ?rule, ?size_check, "Decided");
        state.trace = Some(DecisionTrace {
            rule,
            size_check,
            inputs: state.trace_inputs(),
        });
        state.decision = Some(decision);
        decision
    }
}

fn limit_check(limited: bool) -> SizeCheck {
    if limited {
        SizeCheck::WithinLimit
    } else {
        SizeCheck::Unlimited
    }
}
