//! Process supervisor: keep the configured long-running services alive.
//!
//! Each service runs as a child with its output appended to
//! `Logs/<name>.log`. A child that exits for any reason counts as a crash
//! and is relaunched after the restart delay. Restarts are unbounded unless
//! `supervisor.max_restarts` is set.

use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::io::audit::{RESULT_ERROR, RESULT_OK};
use crate::io::config::{ServiceConfig, SupervisorConfig};
use crate::io::process::{spawn_logged, terminate_gracefully};
use crate::shutdown::StopSignal;
use crate::vault::Vault;

pub const SKILL: &str = "supervisor";

#[derive(Debug)]
enum ServiceState {
    Running(Child),
    RestartPending { at: Instant },
    GivenUp,
    Stopped,
}

/// Supervisor-owned record for one service.
#[derive(Debug)]
struct ManagedProcess {
    name: String,
    command: Vec<String>,
    restarts: u32,
    state: ServiceState,
}

/// Snapshot for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub pid: Option<u32>,
    pub restarts: u32,
    pub state: &'static str,
}

pub struct Supervisor<'a> {
    vault: &'a Vault,
    config: SupervisorConfig,
    services: Vec<ManagedProcess>,
    last_signal_merge: Option<Instant>,
}

impl<'a> Supervisor<'a> {
    pub fn new(vault: &'a Vault) -> Self {
        Self::with_config(vault, vault.config.supervisor.clone())
    }

    pub fn with_config(vault: &'a Vault, config: SupervisorConfig) -> Self {
        let services = config
            .services
            .iter()
            .map(|ServiceConfig { name, command }| ManagedProcess {
                name: name.clone(),
                command: command.clone(),
                restarts: 0,
                state: ServiceState::Stopped,
            })
            .collect();
        Self {
            vault,
            config,
            services,
            last_signal_merge: None,
        }
    }

    fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.config.restart_delay_secs)
    }

    /// Launch every service. A launch failure is treated like a crash.
    pub fn start(&mut self) -> Result<()> {
        let now = Instant::now();
        for idx in 0..self.services.len() {
            self.launch(idx, "start", now)?;
        }
        Ok(())
    }

    fn launch(&mut self, idx: usize, action: &str, now: Instant) -> Result<()> {
        let delay = self.restart_delay();
        let max_restarts = self.config.max_restarts;
        let vault = self.vault;
        let service = &mut self.services[idx];
        let log_path = vault.paths.service_log(&service.name);
        let action = format!("{action}_{}", service.name);
        match spawn_logged(&service.command, &vault.paths.root, &log_path) {
            Ok(child) => {
                let detail = format!("pid {} restarts {}", child.id(), service.restarts);
                info!(service = %service.name, pid = child.id(), "service running");
                service.state = ServiceState::Running(child);
                vault.audit.log(SKILL, &action, RESULT_OK, None, &detail)?;
            }
            Err(err) => {
                error!(service = %service.name, err = %format!("{err:#}"), "launch failed");
                vault.audit.error(SKILL, &action, None, &err)?;
                if max_restarts.is_some_and(|max| service.restarts >= max) {
                    service.state = ServiceState::GivenUp;
                    error!(service = %service.name, restarts = service.restarts, "restart limit reached");
                    vault.audit.log(
                        SKILL,
                        &format!("crash_{}", service.name),
                        "given_up",
                        None,
                        &format!("launch failed after {} restarts", service.restarts),
                    )?;
                } else {
                    service.state = ServiceState::RestartPending { at: now + delay };
                }
            }
        }
        Ok(())
    }

    /// One supervision pass: detect exits and relaunch services that are due.
    #[instrument(skip_all)]
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        for idx in 0..self.services.len() {
            let relaunch_due = matches!(
                self.services[idx].state,
                ServiceState::RestartPending { at } if now >= at
            );
            if relaunch_due {
                self.services[idx].restarts += 1;
                self.launch(idx, "restart", now)?;
                continue;
            }
            let ServiceState::Running(child) = &mut self.services[idx].state else {
                continue;
            };
            if let Some(status) = child.try_wait()? {
                self.record_exit(idx, status, now)?;
            }
        }
        Ok(())
    }

    fn record_exit(&mut self, idx: usize, status: ExitStatus, now: Instant) -> Result<()> {
        let delay = self.restart_delay();
        let limit_hit = self
            .config
            .max_restarts
            .is_some_and(|max| self.services[idx].restarts >= max);
        let service = &mut self.services[idx];
        warn!(service = %service.name, %status, "service exited");
        let action = format!("crash_{}", service.name);
        if limit_hit {
            service.state = ServiceState::GivenUp;
            error!(service = %service.name, restarts = service.restarts, "restart limit reached");
            self.vault.audit.log(
                SKILL,
                &action,
                "given_up",
                None,
                &format!("{status} after {} restarts", service.restarts),
            )
        } else {
            service.state = ServiceState::RestartPending { at: now + delay };
            self.vault.audit.log(
                SKILL,
                &action,
                "restarting",
                None,
                &format!("{status}; restart in {}s", delay.as_secs()),
            )
        }
    }

    /// Fold pending signal files into the audit log.
    pub fn merge_signals(&mut self) -> Result<usize> {
        let signals = self.vault.signals.drain()?;
        for signal in &signals {
            let task = (!signal.task_id.is_empty()).then_some(signal.task_id.as_str());
            self.vault.audit.log(
                SKILL,
                &format!("signal_{}", signal.event),
                RESULT_OK,
                task,
                &signal.detail,
            )?;
        }
        self.last_signal_merge = Some(Instant::now());
        Ok(signals.len())
    }

    fn signal_merge_due(&self, now: Instant) -> bool {
        let every = Duration::from_secs(self.config.signal_merge_secs);
        self.last_signal_merge
            .is_none_or(|last| now.duration_since(last) >= every)
    }

    /// Terminate every running child within the grace period.
    pub fn shutdown(&mut self) -> Result<()> {
        let grace = Duration::from_secs(self.config.grace_secs);
        for service in &mut self.services {
            let state = std::mem::replace(&mut service.state, ServiceState::Stopped);
            if let ServiceState::Running(mut child) = state {
                let detail = match terminate_gracefully(&mut child, grace) {
                    Ok(status) => status.to_string(),
                    Err(err) => format!("{err:#}"),
                };
                self.vault.audit.log(
                    SKILL,
                    &format!("stop_{}", service.name),
                    RESULT_OK,
                    None,
                    &detail,
                )?;
            }
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<ServiceStatus> {
        self.services
            .iter()
            .map(|s| {
                let (pid, state) = match &s.state {
                    ServiceState::Running(child) => (Some(child.id()), "running"),
                    ServiceState::RestartPending { .. } => (None, "restart_pending"),
                    ServiceState::GivenUp => (None, "given_up"),
                    ServiceState::Stopped => (None, "stopped"),
                };
                ServiceStatus {
                    name: s.name.clone(),
                    pid,
                    restarts: s.restarts,
                    state,
                }
            })
            .collect()
    }

    /// Start everything and supervise until `stop` is triggered.
    pub fn run(&mut self, stop: &StopSignal) -> Result<()> {
        self.vault.audit.log(
            SKILL,
            "supervisor_start",
            RESULT_OK,
            None,
            &format!("{} services", self.services.len()),
        )?;
        self.start()?;
        let poll = Duration::from_secs(self.config.poll_secs);
        while !stop.is_stopped() {
            let now = Instant::now();
            if let Err(err) = self.tick(now) {
                error!(err = %format!("{err:#}"), "supervision pass failed");
                self.vault.audit.error(SKILL, "tick", None, &err)?;
            }
            if self.signal_merge_due(now)
                && let Err(err) = self.merge_signals()
            {
                warn!(err = %format!("{err:#}"), "signal merge failed");
            }
            if stop.sleep(poll) {
                break;
            }
        }
        info!("stopping services");
        self.shutdown()?;
        let result = if self
            .services
            .iter()
            .any(|s| matches!(s.state, ServiceState::GivenUp))
        {
            RESULT_ERROR
        } else {
            RESULT_OK
        };
        self.vault
            .audit
            .log(SKILL, "supervisor_stop", result, None, "")?;
        Ok(())
    }
}
