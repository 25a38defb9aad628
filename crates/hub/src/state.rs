// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthSessions;
use crate::config::Config;
use crate::machines::MachineRegistry;
use crate::spawn::LauncherTracker;

/// Process-wide hub state. Each table documents its own single-writer zone;
/// handlers receive the whole thing behind an `Arc`.
pub struct HubState {
    pub config: Config,
    pub machines: Arc<MachineRegistry>,
    pub auth: Arc<AuthSessions>,
    pub launchers: Arc<LauncherTracker>,
    pub shutdown: CancellationToken,
}

pub type SharedHub = Arc<HubState>;

impl HubState {
    pub fn new(config: Config) -> SharedHub {
        Arc::new(Self {
            config,
            machines: Arc::new(MachineRegistry::new()),
            auth: Arc::new(AuthSessions::new()),
            launchers: Arc::new(LauncherTracker::new()),
            shutdown: CancellationToken::new(),
        })
    }
}
