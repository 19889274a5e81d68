//! Dependency Resolver - 플러그인 간 버전 의존성 대기
//!
//! 대기 중인 플러그인마다 의존 대상 이름으로 간선을 둔 그래프를 유지합니다.
//! 플러그인 X의 `PluginInfoChanged`가 오면 X를 가리키는 대기자만 다시 평가합니다.
//!
//! ```text
//!   edges: "bar" ──► { foo#1, qux#3 }
//!          "baz" ──► { foo#1 }
//!
//!   PluginInfoChanged(bar) ──► evaluate(foo#1), evaluate(qux#3)
//! ```

use super::error::{DependencyError, DependencyIssue};
use super::manifest::DependencyRequirement;
use super::registry::PluginRegistry;
use dynplug_foundation::{EventType, RuntimeEvent, Subscription};
use parking_lot::Mutex;
use semver::Version;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// 의존 대상의 해석 상태 (없으면 Pending)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyResolution {
    Satisfied(Version),
    Failed,
}

/// 요구사항 평가 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Satisfied,
    Pending(Vec<String>),
    Unsatisfiable(Vec<DependencyIssue>),
}

/// 스냅샷 기준으로 요구사항 평가
///
/// 충족 불가 항목이 하나라도 있으면 다른 항목이 대기 중이어도 실패입니다.
pub fn evaluate(
    requirements: &[DependencyRequirement],
    resolutions: &HashMap<String, DependencyResolution>,
) -> Evaluation {
    let mut pending = Vec::new();
    let mut issues = Vec::new();

    for req in requirements {
        match resolutions.get(&req.name) {
            None if req.optional => {}
            None => pending.push(req.name.clone()),
            Some(DependencyResolution::Failed) => issues.push(DependencyIssue::Failed {
                dependency: req.name.clone(),
            }),
            Some(DependencyResolution::Satisfied(version)) => {
                if !req.range.matches(version) {
                    issues.push(DependencyIssue::VersionMismatch {
                        dependency: req.name.clone(),
                        required: req.range.to_string(),
                        found: version.to_string(),
                    });
                }
            }
        }
    }

    if !issues.is_empty() {
        Evaluation::Unsatisfiable(issues)
    } else if !pending.is_empty() {
        Evaluation::Pending(pending)
    } else {
        Evaluation::Satisfied
    }
}

/// 고정 해석 파싱 (유효하지 않은 semver는 경고 후 제외)
pub fn parse_fixed_resolutions<'a>(
    fixed: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> BTreeMap<String, Version> {
    fixed
        .into_iter()
        .filter_map(|(name, version)| match Version::parse(version.trim()) {
            Ok(parsed) => Some((name.clone(), parsed)),
            Err(e) => {
                warn!(dependency = %name, version = %version, error = %e, "Ignoring invalid fixed dependency resolution");
                None
            }
        })
        .collect()
}

// ============================================================================
// WaitGraph
// ============================================================================

type WaiterId = u64;

struct Waiter {
    plugin: String,
    requirements: Vec<DependencyRequirement>,
    tx: oneshot::Sender<Result<(), DependencyError>>,
}

#[derive(Default)]
struct WaitGraph {
    waiters: HashMap<WaiterId, Waiter>,
    /// 의존 대상 이름 -> 대기자
    edges: HashMap<String, HashSet<WaiterId>>,
    next_id: WaiterId,
}

impl WaitGraph {
    fn insert(&mut self, waiter: Waiter) -> WaiterId {
        self.next_id += 1;
        let id = self.next_id;
        for req in &waiter.requirements {
            self.edges.entry(req.name.clone()).or_default().insert(id);
        }
        self.waiters.insert(id, waiter);
        id
    }

    /// 대기자 제거 (이미 없으면 무시)
    fn remove(&mut self, id: WaiterId) -> Option<Waiter> {
        let waiter = self.waiters.remove(&id)?;
        for req in &waiter.requirements {
            if let Some(ids) = self.edges.get_mut(&req.name) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.edges.remove(&req.name);
                }
            }
        }
        Some(waiter)
    }

    fn waiting_on(&self, dependency: &str) -> Vec<WaiterId> {
        self.edges
            .get(dependency)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// DependencyResolver
// ============================================================================

struct ResolverShared {
    registry: Arc<PluginRegistry>,
    fixed: BTreeMap<String, Version>,
    graph: Mutex<WaitGraph>,
}

impl ResolverShared {
    /// 레지스트리 스냅샷 + 고정 해석 (고정 해석이 우선)
    fn resolutions(&self) -> HashMap<String, DependencyResolution> {
        let mut resolutions = self.registry.resolution_snapshot();
        for (name, version) in &self.fixed {
            resolutions.insert(name.clone(), DependencyResolution::Satisfied(version.clone()));
        }
        resolutions
    }

    fn on_plugin_changed(&self, dependency: &str) {
        let mut graph = self.graph.lock();
        let ids = graph.waiting_on(dependency);
        if ids.is_empty() {
            return;
        }

        let resolutions = self.resolutions();
        for id in ids {
            let outcome = match graph.waiters.get(&id) {
                Some(waiter) => evaluate(&waiter.requirements, &resolutions),
                None => continue,
            };

            let result = match outcome {
                Evaluation::Pending(_) => continue,
                Evaluation::Satisfied => Ok(()),
                Evaluation::Unsatisfiable(issues) => Err(issues),
            };

            if let Some(waiter) = graph.remove(id) {
                trace!(plugin = %waiter.plugin, trigger = %dependency, "Dependency waiter settled");
                let result = result.map_err(|issues| DependencyError::Unsatisfiable {
                    plugin: waiter.plugin.clone(),
                    issues,
                });
                // 수신 측이 이미 사라졌으면 무시
                let _ = waiter.tx.send(result);
            }
        }
    }
}

/// 대기 중 future가 드롭되면 대기자 제거
struct WaiterGuard {
    shared: Weak<ResolverShared>,
    id: WaiterId,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.graph.lock().remove(self.id);
        }
    }
}

/// 의존성 해석기
pub struct DependencyResolver {
    shared: Arc<ResolverShared>,
    subscription: Subscription,
}

impl DependencyResolver {
    /// 레지스트리 이벤트를 구독하는 해석기 생성
    pub fn new(registry: Arc<PluginRegistry>, fixed: BTreeMap<String, Version>) -> Self {
        let shared = Arc::new(ResolverShared {
            registry: Arc::clone(&registry),
            fixed,
            graph: Mutex::new(WaitGraph::default()),
        });

        let weak = Arc::downgrade(&shared);
        let subscription = registry.events().subscribe(
            &[EventType::PluginInfoChanged],
            move |event: &RuntimeEvent| {
                if let (Some(shared), Some(plugin)) = (weak.upgrade(), event.plugin_name.as_deref()) {
                    shared.on_plugin_changed(plugin);
                }
            },
        );

        Self {
            shared,
            subscription,
        }
    }

    /// 고정 해석 목록
    pub fn fixed_resolutions(&self) -> &BTreeMap<String, Version> {
        &self.shared.fixed
    }

    /// 현재 대기자 수
    pub fn waiting_count(&self) -> usize {
        self.shared.graph.lock().waiters.len()
    }

    /// 현재 스냅샷으로 평가
    pub fn evaluate(&self, requirements: &[DependencyRequirement]) -> Evaluation {
        evaluate(requirements, &self.shared.resolutions())
    }

    /// 의존성이 충족될 때까지 대기
    ///
    /// 즉시 한 번 평가하고, 이후 관련 플러그인이 바뀔 때마다 다시 평가합니다.
    /// 자체 타임아웃은 없습니다.
    pub async fn resolve(
        &self,
        plugin: &str,
        requirements: Vec<DependencyRequirement>,
    ) -> Result<(), DependencyError> {
        let (id, rx) = {
            let mut graph = self.shared.graph.lock();
            match evaluate(&requirements, &self.shared.resolutions()) {
                Evaluation::Satisfied => {
                    debug!(plugin = %plugin, "Dependencies satisfied");
                    return Ok(());
                }
                Evaluation::Unsatisfiable(issues) => {
                    return Err(DependencyError::Unsatisfiable {
                        plugin: plugin.to_string(),
                        issues,
                    });
                }
                Evaluation::Pending(waiting) => {
                    debug!(plugin = %plugin, waiting = ?waiting, "Waiting for dependencies");
                    let (tx, rx) = oneshot::channel();
                    let id = graph.insert(Waiter {
                        plugin: plugin.to_string(),
                        requirements,
                        tx,
                    });
                    (id, rx)
                }
            }
        };

        let _guard = WaiterGuard {
            shared: Arc::downgrade(&self.shared),
            id,
        };

        rx.await
            .unwrap_or_else(|_| Err(DependencyError::Abandoned(plugin.to_string())))
    }
}

impl Drop for DependencyResolver {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
