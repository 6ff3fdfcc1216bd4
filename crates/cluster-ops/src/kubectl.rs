//! Cluster status queries through `kubectl`.
//!
//! JSON output is decoded into `k8s-openapi` objects and reduced to the few
//! fields the readiness checks care about.

use std::path::{Path, PathBuf};

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{run_checked, CommandRunner, Invocation, ToolError};

const KUBECTL: &str = "kubectl";
const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// `kubectl get ... -o json` wraps results in a generic `List`.
#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Readiness summary of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub name: String,
    pub ready: bool,
    pub internal_ip: Option<String>,
    pub roles: Vec<String>,
}

/// Health summary of one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodStatus {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restarts: i32,
    /// Reason of the first waiting container (e.g. `CrashLoopBackOff`).
    pub waiting_reason: Option<String>,
}

impl PodStatus {
    /// Running with every container ready, or finished successfully.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        (self.phase == "Running" && self.ready) || self.phase == "Succeeded"
    }

    #[must_use]
    pub fn is_crash_looping(&self) -> bool {
        self.waiting_reason.as_deref() == Some("CrashLoopBackOff")
    }
}

/// Ready vs desired replicas of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplicaCount {
    pub ready: i32,
    pub desired: i32,
}

impl ReplicaCount {
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.ready >= 1 && self.ready >= self.desired
    }
}

/// Thin `kubectl` client bound to one kubeconfig.
pub struct Kubectl<'a> {
    runner: &'a dyn CommandRunner,
    kubeconfig: Option<PathBuf>,
}

impl<'a> Kubectl<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, kubeconfig: Option<&Path>) -> Self {
        Self {
            runner,
            kubeconfig: kubeconfig.map(Path::to_path_buf),
        }
    }

    fn invocation(&self) -> Invocation {
        let inv = Invocation::new(KUBECTL);
        match self.kubeconfig {
            Some(ref path) => inv.arg("--kubeconfig").path_arg(path),
            None => inv,
        }
    }

    fn get_json<T: DeserializeOwned>(&self, what: &str, args: &[&str]) -> Result<T, ToolError> {
        let inv = self.invocation().arg("get").args(args.iter().copied()).args(["-o", "json"]);
        let out = run_checked(self.runner, &inv)?;
        serde_json::from_str(&out.stdout).map_err(|e| ToolError::parse(what, e))
    }

    /// Whether the API server answers `kubectl cluster-info`.
    ///
    /// # Errors
    ///
    /// Returns an error only when kubectl cannot be started.
    pub fn cluster_reachable(&self) -> Result<bool, ToolError> {
        let out = self
            .runner
            .run(&self.invocation().args(["cluster-info", "--request-timeout=10s"]))?;
        Ok(out.success())
    }

    /// All nodes with their Ready condition.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails or emits unexpected JSON.
    pub fn nodes(&self) -> Result<Vec<NodeStatus>, ToolError> {
        let list: ItemList<Node> = self.get_json("node list", &["nodes"])?;
        Ok(list.items.iter().map(summarize_node).collect())
    }

    /// Pods in one namespace, or every namespace when `namespace` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails or emits unexpected JSON.
    pub fn pods(&self, namespace: Option<&str>) -> Result<Vec<PodStatus>, ToolError> {
        let list: ItemList<Pod> = match namespace {
            Some(ns) => self.get_json("pod list", &["pods", "-n", ns])?,
            None => self.get_json("pod list", &["pods", "--all-namespaces"])?,
        };
        Ok(list.items.iter().map(summarize_pod).collect())
    }

    /// Ready/desired replicas of a deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment cannot be read.
    pub fn deployment_replicas(&self, namespace: &str, name: &str) -> Result<ReplicaCount, ToolError> {
        let deployment: Deployment =
            self.get_json("deployment", &["deployment", name, "-n", namespace])?;
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        debug!(namespace, name, ready, desired, "Deployment replicas");
        Ok(ReplicaCount { ready, desired })
    }

    /// Last `lines` log lines of pods matching a label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl fails.
    pub fn logs_tail(&self, namespace: &str, selector: &str, lines: u32) -> Result<String, ToolError> {
        let inv = self.invocation().args([
            "logs".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "-l".to_string(),
            selector.to_string(),
            format!("--tail={lines}"),
            "--prefix".to_string(),
        ]);
        Ok(run_checked(self.runner, &inv)?.stdout)
    }
}

fn summarize_node(node: &Node) -> NodeStatus {
    let name = node.metadata.name.clone().unwrap_or_default();
    let status = node.status.as_ref();

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"));

    let internal_ip = status
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone());

    let roles = node
        .metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix(ROLE_LABEL_PREFIX))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    NodeStatus {
        name,
        ready,
        internal_ip,
        roles,
    }
}

fn summarize_pod(pod: &Pod) -> PodStatus {
    let status = pod.status.as_ref();
    let containers = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let waiting_reason = containers
        .iter()
        .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.clone())
        .next();

    PodStatus {
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ready: !containers.is_empty() && containers.iter().all(|c| c.ready),
        restarts: containers.iter().map(|c| c.restart_count).sum(),
        waiting_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{MockCommandRunner, ToolOutput};

    const NODES_JSON: &str = r#"{
      "apiVersion": "v1",
      "kind": "List",
      "items": [
        {
          "apiVersion": "v1",
          "kind": "Node",
          "metadata": {
            "name": "home-cp",
            "labels": {"node-role.kubernetes.io/control-plane": "true"}
          },
          "status": {
            "conditions": [{"type": "Ready", "status": "True"}],
            "addresses": [{"type": "InternalIP", "address": "100.101.1.1"}]
          }
        },
        {
          "apiVersion": "v1",
          "kind": "Node",
          "metadata": {"name": "vps-1"},
          "status": {"conditions": [{"type": "Ready", "status": "False"}]}
        }
      ]
    }"#;

    const PODS_JSON: &str = r#"{
      "apiVersion": "v1",
      "kind": "List",
      "items": [
        {
          "apiVersion": "v1",
          "kind": "Pod",
          "metadata": {"name": "coredns-abc", "namespace": "kube-system"},
          "status": {
            "phase": "Running",
            "containerStatuses": [
              {"name": "coredns", "image": "coredns", "imageID": "", "ready": true, "restartCount": 1}
            ]
          }
        },
        {
          "apiVersion": "v1",
          "kind": "Pod",
          "metadata": {"name": "broken-xyz", "namespace": "kube-system"},
          "status": {
            "phase": "Running",
            "containerStatuses": [
              {
                "name": "app", "image": "app", "imageID": "", "ready": false, "restartCount": 7,
                "state": {"waiting": {"reason": "CrashLoopBackOff"}}
              }
            ]
          }
        }
      ]
    }"#;

    #[test]
    fn test_nodes_parses_ready_condition_and_roles() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| {
                inv.has_args_prefix(&["--kubeconfig", "/tmp/kc", "get", "nodes"])
                    && inv.args.ends_with(&["-o".to_string(), "json".to_string()])
            })
            .returning(|_| Ok(ToolOutput::ok(NODES_JSON)));

        let kubectl = Kubectl::new(&runner, Some(Path::new("/tmp/kc")));
        let nodes = kubectl.nodes().unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "home-cp");
        assert!(nodes[0].ready);
        assert_eq!(nodes[0].internal_ip.as_deref(), Some("100.101.1.1"));
        assert_eq!(nodes[0].roles, vec!["control-plane".to_string()]);
        assert!(!nodes[1].ready);
        assert!(nodes[1].roles.is_empty());
    }

    #[test]
    fn test_pods_summarizes_health() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ToolOutput::ok(PODS_JSON)));

        let pods = Kubectl::new(&runner, None).pods(Some("kube-system")).unwrap();
        assert!(pods[0].is_healthy());
        assert_eq!(pods[0].restarts, 1);
        assert!(!pods[1].is_healthy());
        assert!(pods[1].is_crash_looping());
    }

    #[test]
    fn test_deployment_replicas() {
        let json = r#"{
          "apiVersion": "apps/v1",
          "kind": "Deployment",
          "metadata": {"name": "coredns", "namespace": "kube-system"},
          "spec": {"replicas": 2, "selector": {}, "template": {}},
          "status": {"readyReplicas": 1}
        }"#;
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(move |_| Ok(ToolOutput::ok(json)));

        let count = Kubectl::new(&runner, None)
            .deployment_replicas("kube-system", "coredns")
            .unwrap();
        assert_eq!(count, ReplicaCount { ready: 1, desired: 2 });
        assert!(!count.is_converged());
        assert!(ReplicaCount { ready: 2, desired: 2 }.is_converged());
        assert!(!ReplicaCount { ready: 0, desired: 0 }.is_converged());
    }

    #[test]
    fn test_kubectl_failure_surfaces_tail() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| {
            Ok(ToolOutput::failed(
                1,
                "The connection to the server 100.101.1.1:6443 was refused",
            ))
        });

        let err = Kubectl::new(&runner, None).nodes().unwrap_err();
        assert!(err.output_tail().unwrap().contains("was refused"));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(ToolOutput::ok("not json")));

        let err = Kubectl::new(&runner, None).nodes().unwrap_err();
        assert!(matches!(err, ToolError::Parse { .. }));
    }
}
