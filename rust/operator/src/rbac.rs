//! The ServiceAccount, Role and RoleBinding every pipeline container runs with.

use std::{collections::BTreeMap, fmt::Debug};

use cluster_curator_crd::{APP_NAME, WORKER_ROLE, WORKER_SERVICE_ACCOUNT};
use serde::{de::DeserializeOwned, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::{
            core::v1::ServiceAccount,
            rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
        },
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
        NamespaceResourceScope,
    },
    kube::{self, api::PostParams, Api, Resource},
};

use crate::{
    error::{Classify, ErrorKind},
    retry,
};

const VERBS: &[&str] = &["create", "patch", "get", "update"];
const CORE_RESOURCES: &[&str] = &["configmaps", "secrets"];
const BATCH_RESOURCES: &[&str] = &["jobs"];
const HIVE_RESOURCES: &[&str] = &["clusterdeployments", "machinepools"];
const TOWER_RESOURCES: &[&str] = &["ansiblejobs"];

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to ensure {kind} {name:?} in namespace {namespace:?}"))]
    Ensure {
        source: kube::Error,
        kind: &'static str,
        namespace: String,
        name: String,
    },
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Ensure { source, .. } => source.kind(),
        }
    }
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            "app.kubernetes.io/managed-by".to_string(),
            APP_NAME.to_string(),
        )])),
        ..ObjectMeta::default()
    }
}

pub fn build_service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(namespace, WORKER_SERVICE_ACCOUNT),
        ..ServiceAccount::default()
    }
}

fn rule(api_group: &str, resources: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: VERBS.iter().map(|v| v.to_string()).collect(),
        ..PolicyRule::default()
    }
}

pub fn build_role(namespace: &str) -> Role {
    Role {
        metadata: metadata(namespace, WORKER_ROLE),
        rules: Some(vec![
            rule("", CORE_RESOURCES),
            rule("batch", BATCH_RESOURCES),
            rule("hive.openshift.io", HIVE_RESOURCES),
            rule("tower.ansible.com", TOWER_RESOURCES),
        ]),
    }
}

pub fn build_role_binding(namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: metadata(namespace, WORKER_ROLE),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: WORKER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: WORKER_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Subject::default()
        }]),
    }
}

/// Creates the worker ServiceAccount, Role and RoleBinding in `namespace`,
/// leaving any that already exist untouched.
pub async fn ensure(client: kube::Client, namespace: &str) -> Result<(), Error> {
    create_if_absent(client.clone(), build_service_account(namespace), "ServiceAccount").await?;
    create_if_absent(client.clone(), build_role(namespace), "Role").await?;
    create_if_absent(client, build_role_binding(namespace), "RoleBinding").await?;
    Ok(())
}

async fn create_if_absent<K>(client: kube::Client, object: K, kind: &'static str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Serialize,
    K::DynamicType: Default,
{
    let namespace = object.meta().namespace.clone().unwrap_or_default();
    let name = object.meta().name.clone().unwrap_or_default();
    let api: Api<K> = Api::namespaced(client, &namespace);
    let existing = api.get_opt(&name).await.with_context(|_| EnsureSnafu {
        kind,
        namespace: &namespace,
        name: &name,
    })?;
    if existing.is_some() {
        return Ok(());
    }
    match api.create(&PostParams::default(), &object).await {
        Ok(_) => {
            tracing::info!(kind, %namespace, %name, "created worker RBAC object");
            Ok(())
        }
        // lost a race against another reconcile
        Err(error) if retry::is_already_exists(&error) => Ok(()),
        Err(source) => Err(Error::Ensure {
            source,
            kind,
            namespace,
            name,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_grants_the_minimal_verbs() {
        let role = build_role("c1");
        assert_eq!(role.metadata.name.as_deref(), Some("curator"));
        assert_eq!(role.metadata.namespace.as_deref(), Some("c1"));

        let rules = role.rules.unwrap();
        let mut resources = rules
            .iter()
            .flat_map(|r| r.resources.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        resources.sort();
        assert_eq!(
            resources,
            vec![
                "ansiblejobs",
                "clusterdeployments",
                "configmaps",
                "jobs",
                "machinepools",
                "secrets"
            ]
        );
        for rule in &rules {
            assert_eq!(rule.verbs, vec!["create", "patch", "get", "update"]);
        }
    }

    #[test]
    fn binding_targets_the_worker_service_account() {
        let binding = build_role_binding("hc1");
        assert_eq!(binding.role_ref.name, "curator");
        let subjects = binding.subjects.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].name, "cluster-installer");
        assert_eq!(subjects[0].namespace.as_deref(), Some("hc1"));

        let sa = build_service_account("hc1");
        assert_eq!(sa.metadata.name.as_deref(), Some("cluster-installer"));
    }

    #[test]
    fn building_is_deterministic() {
        assert_eq!(build_role("c1"), build_role("c1"));
        assert_eq!(build_role_binding("c1"), build_role_binding("c1"));
    }
}
