// The four deployment workflows: build, push, deploy and rollback.
//
// Steps run strictly in sequence and the first failure ends the workflow.
// Nothing is retried and completed steps are not undone.

use std::time::Duration;

use tracing::info;

use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::rollback::TaskDefinitionRef;
use crate::runner::{run_checked, CommandRunner};
use crate::steps;

/// A rollback decision for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackPlan {
    pub service: String,
    pub current: TaskDefinitionRef,
    pub target: TaskDefinitionRef,
}

pub struct Deployer<'a> {
    cfg: &'a DeployConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> Deployer<'a> {
    pub fn new(cfg: &'a DeployConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { cfg, runner }
    }

    /// Build every image and tag it for the registry. No login, no push.
    pub async fn build(&self) -> Result<(), DeployError> {
        for svc in &self.cfg.settings.services {
            info!("building {}", svc.repository);
            run_checked(self.runner, &steps::docker_build(self.cfg, svc)).await?;
            for tag in self.cfg.remote_tags() {
                run_checked(self.runner, &steps::docker_tag(self.cfg, svc, &tag)).await?;
            }
        }
        Ok(())
    }

    /// Log in to the registry and push every tag. No build.
    pub async fn push(&self) -> Result<(), DeployError> {
        self.login().await?;
        for svc in &self.cfg.settings.services {
            info!("pushing {}", svc.repository);
            for tag in self.cfg.remote_tags() {
                run_checked(self.runner, &steps::docker_push(self.cfg, svc, &tag)).await?;
            }
        }
        Ok(())
    }

    async fn login(&self) -> Result<(), DeployError> {
        let password = run_checked(self.runner, &steps::ecr_login_password(self.cfg)).await?;
        run_checked(self.runner, &steps::docker_login(self.cfg, &password.stdout)).await?;
        info!("logged in to {}", self.cfg.registry());
        Ok(())
    }

    /// Build, push, force a new deployment of every service and wait for
    /// the cluster to settle.
    pub async fn deploy(&self) -> Result<(), DeployError> {
        self.build().await?;
        self.push().await?;
        for svc in &self.cfg.settings.services {
            info!("updating service {}", svc.name);
            run_checked(self.runner, &steps::force_new_deployment(self.cfg, svc)).await?;
        }
        self.wait_stable().await?;
        info!("deployment of {} complete", self.cfg.environment);
        Ok(())
    }

    /// Resolve the rollback target of every service without changing anything.
    /// Fails if any service is already at its first revision.
    pub async fn plan_rollback(&self) -> Result<Vec<RollbackPlan>, DeployError> {
        let mut plans = Vec::with_capacity(self.cfg.settings.services.len());
        for svc in &self.cfg.settings.services {
            let out =
                run_checked(self.runner, &steps::describe_task_definition(self.cfg, svc)).await?;
            let current: TaskDefinitionRef = out.stdout.parse()?;
            let target = current
                .previous()
                .ok_or_else(|| DeployError::NoPreviousRevision {
                    service: svc.name.clone(),
                    revision: current.revision,
                })?;
            info!("{}: {} -> {}", svc.name, current, target);
            plans.push(RollbackPlan {
                service: svc.name.clone(),
                current,
                target,
            });
        }
        Ok(plans)
    }

    /// Point every service at the task definition revision before its
    /// current one, then wait for stability.
    pub async fn rollback(&self) -> Result<Vec<RollbackPlan>, DeployError> {
        let plans = self.plan_rollback().await?;
        for (svc, plan) in self.cfg.settings.services.iter().zip(&plans) {
            run_checked(
                self.runner,
                &steps::update_task_definition(self.cfg, svc, &plan.target),
            )
            .await?;
        }
        self.wait_stable().await?;
        Ok(plans)
    }

    async fn wait_stable(&self) -> Result<(), DeployError> {
        let spec = steps::wait_services_stable(self.cfg);
        let secs = self.cfg.settings.wait.timeout_secs;
        info!("waiting up to {}s for services to stabilize", secs);
        tokio::time::timeout(Duration::from_secs(secs), run_checked(self.runner, &spec))
            .await
            .map_err(|_| DeployError::Timeout {
                command: spec.to_string(),
                secs,
            })??;
        Ok(())
    }
}
