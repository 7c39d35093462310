// Builders for the docker and aws CLI invocations used by the workflows.

use crate::config::{DeployConfig, ServiceConfig};
use crate::rollback::TaskDefinitionRef;
use crate::runner::CommandSpec;

pub fn docker_build(cfg: &DeployConfig, svc: &ServiceConfig) -> CommandSpec {
    CommandSpec::new(
        "docker",
        [
            "build".to_string(),
            "-t".to_string(),
            cfg.local_image(svc),
            "-f".to_string(),
            svc.dockerfile.clone(),
            svc.context.clone(),
        ],
    )
}

pub fn docker_tag(cfg: &DeployConfig, svc: &ServiceConfig, tag: &str) -> CommandSpec {
    CommandSpec::new(
        "docker",
        [
            "tag".to_string(),
            cfg.local_image(svc),
            cfg.remote_image(svc, tag),
        ],
    )
}

pub fn docker_push(cfg: &DeployConfig, svc: &ServiceConfig, tag: &str) -> CommandSpec {
    CommandSpec::new("docker", ["push".to_string(), cfg.remote_image(svc, tag)])
}

pub fn ecr_login_password(cfg: &DeployConfig) -> CommandSpec {
    CommandSpec::new(
        "aws",
        [
            "ecr",
            "get-login-password",
            "--region",
            cfg.region.as_str(),
        ],
    )
}

/// `password` is the output of [`ecr_login_password`], passed on stdin.
pub fn docker_login(cfg: &DeployConfig, password: &str) -> CommandSpec {
    CommandSpec::new(
        "docker",
        [
            "login".to_string(),
            "--username".to_string(),
            "AWS".to_string(),
            "--password-stdin".to_string(),
            cfg.registry(),
        ],
    )
    .with_stdin(password.trim().as_bytes().to_vec())
}

pub fn force_new_deployment(cfg: &DeployConfig, svc: &ServiceConfig) -> CommandSpec {
    CommandSpec::new(
        "aws",
        [
            "ecs",
            "update-service",
            "--cluster",
            cfg.settings.cluster.as_str(),
            "--service",
            svc.name.as_str(),
            "--force-new-deployment",
            "--region",
            cfg.region.as_str(),
        ],
    )
}

pub fn describe_task_definition(cfg: &DeployConfig, svc: &ServiceConfig) -> CommandSpec {
    CommandSpec::new(
        "aws",
        [
            "ecs",
            "describe-services",
            "--cluster",
            cfg.settings.cluster.as_str(),
            "--services",
            svc.name.as_str(),
            "--query",
            "services[0].taskDefinition",
            "--output",
            "text",
            "--region",
            cfg.region.as_str(),
        ],
    )
}

pub fn update_task_definition(
    cfg: &DeployConfig,
    svc: &ServiceConfig,
    target: &TaskDefinitionRef,
) -> CommandSpec {
    CommandSpec::new(
        "aws",
        [
            "ecs".to_string(),
            "update-service".to_string(),
            "--cluster".to_string(),
            cfg.settings.cluster.clone(),
            "--service".to_string(),
            svc.name.clone(),
            "--task-definition".to_string(),
            target.to_string(),
            "--region".to_string(),
            cfg.region.clone(),
        ],
    )
}

pub fn wait_services_stable(cfg: &DeployConfig) -> CommandSpec {
    let mut args = vec![
        "ecs".to_string(),
        "wait".to_string(),
        "services-stable".to_string(),
        "--cluster".to_string(),
        cfg.settings.cluster.clone(),
        "--services".to_string(),
    ];
    args.extend(cfg.settings.services.iter().map(|s| s.name.clone()));
    args.push("--region".to_string());
    args.push(cfg.region.clone());
    CommandSpec::new("aws", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploySettings;

    fn cfg() -> DeployConfig {
        DeployConfig {
            environment: "production".into(),
            region: "us-east-1".into(),
            account_id: "111122223333".into(),
            settings: DeploySettings::default(),
        }
    }

    #[test]
    fn build_command_line() {
        let cfg = cfg();
        let spec = docker_build(&cfg, &cfg.settings.services[0]);
        assert_eq!(
            spec.to_string(),
            "docker build -t social-analytics-backend:production -f backend/Dockerfile backend"
        );
    }

    #[test]
    fn tag_targets_registry() {
        let cfg = cfg();
        let spec = docker_tag(&cfg, &cfg.settings.services[1], "latest");
        assert_eq!(
            spec.args,
            vec![
                "tag",
                "social-analytics-frontend:production",
                "111122223333.dkr.ecr.us-east-1.amazonaws.com/social-analytics-frontend:latest",
            ]
        );
    }

    #[test]
    fn login_passes_password_on_stdin() {
        let spec = docker_login(&cfg(), "tok\n");
        assert_eq!(spec.stdin.as_deref(), Some(&b"tok"[..]));
        assert!(!spec.args.iter().any(|a| a.contains("tok")));
        assert_eq!(
            spec.args.last().map(String::as_str),
            Some("111122223333.dkr.ecr.us-east-1.amazonaws.com")
        );
    }

    #[test]
    fn wait_lists_every_service() {
        let spec = wait_services_stable(&cfg());
        assert_eq!(
            spec.to_string(),
            "aws ecs wait services-stable --cluster social-analytics-cluster --services \
             social-analytics-backend-service social-analytics-frontend-service --region us-east-1"
        );
    }

    #[test]
    fn describe_queries_task_definition_as_text() {
        let cfg = cfg();
        let spec = describe_task_definition(&cfg, &cfg.settings.services[0]);
        assert!(spec.is_lookup());
        let line = spec.to_string();
        assert!(line.contains("--query services[0].taskDefinition"));
        assert!(line.contains("--output text"));
    }
}
