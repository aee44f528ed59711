//! Transformation engine.
//!
//! Walks the remote declarations collected at link time, turns every eligible one
//! into a [`GeneratedPair`] and installs the pairs in the dispatch table. Work is
//! grouped by owner type: a type is installed completely or not at all, and a
//! failing type never stops the rest of the batch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{RabbitCastError, Result};
use crate::signature::{MethodSignature, ParamType};
use crate::synth::{synthesize, GeneratedPair, Invoker};

/// One `#[remote]` method as emitted by `#[remote_impl]`
#[derive(Debug, Clone, Copy)]
pub struct RemoteDeclaration {
    /// Path of the declaring type, e.g. `chat::Chat`
    pub owner: &'static str,
    /// Module path of the declaring impl block
    pub module: &'static str,
    pub name: &'static str,
    /// Logical channel the operation is published on
    pub channel: &'static str,
    /// Compact signature, `(params)R`
    pub signature: &'static str,
    pub is_static: bool,
    /// Every member name declared in the same impl block
    pub members: &'static [&'static str],
    /// `None` when the method returns a value
    pub invoke: Option<Invoker>,
}

inventory::collect!(RemoteDeclaration);

/// Every declaration linked into the binary
pub fn declarations() -> impl Iterator<Item = &'static RemoteDeclaration> {
    inventory::iter::<RemoteDeclaration>.into_iter()
}

/// Implemented by `#[remote_impl]` for every type declaring remote operations
pub trait RemoteHost: Send + Sync + 'static {
    /// Same value as `RemoteDeclaration::owner`
    const OWNER: &'static str;
}

/// Which declarations a transformation run considers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    /// Declarations whose module path is this module or nested below it
    Module(String),
    /// Declarations owned by exactly these types
    Types(Vec<String>),
}

impl Scope {
    pub fn contains(&self, declaration: &RemoteDeclaration) -> bool {
        match self {
            Scope::All => true,
            Scope::Module(prefix) => {
                declaration.module == prefix
                    || declaration
                        .module
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with("::"))
            }
            Scope::Types(owners) => owners.iter().any(|owner| owner == declaration.owner),
        }
    }
}

/// What one transformation run did
#[derive(Debug, Default)]
pub struct TransformReport {
    /// Types installed by this run
    pub transformed: Vec<String>,
    /// Channels installed by this run
    pub operations: Vec<String>,
    /// Types skipped because an earlier run installed them
    pub skipped_frozen: Vec<String>,
    /// `Owner::name` of declarations that return a value
    pub skipped_non_void: Vec<String>,
    /// Types left untouched, with the error that stopped them
    pub failures: Vec<(String, RabbitCastError)>,
}

impl TransformReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Serialize)]
struct OperationManifest<'a> {
    operation: &'a str,
    channel: &'a str,
    handler: &'a str,
    signature: &'a str,
    params: &'a [ParamType],
    is_static: bool,
}

#[derive(Serialize)]
struct TypeManifest<'a> {
    owner: &'a str,
    operations: Vec<OperationManifest<'a>>,
}

/// Installs generated pairs and answers dispatch lookups
pub struct Engine {
    /// Dispatch table, keyed by channel
    installed: RwLock<HashMap<String, Arc<GeneratedPair>>>,
    frozen: RwLock<HashSet<String>>,
    persist_dir: Option<PathBuf>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            installed: RwLock::new(HashMap::new()),
            frozen: RwLock::new(HashSet::new()),
            persist_dir: None,
        }
    }

    /// Write a JSON manifest per transformed type into `dir`
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    /// Transform every linked declaration in `scope`
    pub async fn transform(&self, scope: &Scope) -> TransformReport {
        let selected: Vec<_> = declarations().filter(|d| scope.contains(d)).collect();
        debug!("Transforming {} declarations in scope {:?}", selected.len(), scope);
        self.transform_declarations(selected).await
    }

    /// Transform an explicit list of declarations
    pub async fn transform_declarations<'a, I>(&self, declarations: I) -> TransformReport
    where
        I: IntoIterator<Item = &'a RemoteDeclaration>,
    {
        let mut by_owner: BTreeMap<&str, Vec<&RemoteDeclaration>> = BTreeMap::new();
        for declaration in declarations {
            by_owner.entry(declaration.owner).or_default().push(declaration);
        }

        let mut report = TransformReport::default();
        for (owner, declarations) in by_owner {
            if self.is_frozen(owner).await {
                debug!("Skipping {}: already transformed", owner);
                report.skipped_frozen.push(owner.to_string());
                continue;
            }

            let pairs = match synthesize_type(&declarations, &mut report.skipped_non_void) {
                Ok(pairs) if pairs.is_empty() => continue,
                Ok(pairs) => pairs,
                Err(e) => {
                    error!("Not transforming {}: {}", owner, e);
                    report.failures.push((owner.to_string(), e));
                    continue;
                }
            };

            if let Err(e) = self.install(owner, &pairs).await {
                error!("Not transforming {}: {}", owner, e);
                report.failures.push((owner.to_string(), e));
                continue;
            }

            if let Some(dir) = &self.persist_dir {
                if let Err(e) = persist(dir, owner, &pairs) {
                    warn!("Could not persist manifest for {}: {}", owner, e);
                }
            }

            info!("Transformed {} ({} remote operations)", owner, pairs.len());
            report
                .operations
                .extend(pairs.iter().map(|pair| pair.stub.channel.clone()));
            report.transformed.push(owner.to_string());
        }
        report
    }

    /// Pair installed for `channel`
    pub async fn installed(&self, channel: &str) -> Option<Arc<GeneratedPair>> {
        self.installed.read().await.get(channel).cloned()
    }

    /// Every pair owned by `owner`, ordered by channel
    pub async fn owned_by(&self, owner: &str) -> Vec<Arc<GeneratedPair>> {
        let installed = self.installed.read().await;
        let mut pairs: Vec<_> = installed
            .values()
            .filter(|pair| pair.handler.owner == owner)
            .cloned()
            .collect();
        pairs.sort_by(|a, b| a.stub.channel.cmp(&b.stub.channel));
        pairs
    }

    /// Every installed channel, sorted
    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<_> = self.installed.read().await.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub async fn is_frozen(&self, owner: &str) -> bool {
        self.frozen.read().await.contains(owner)
    }

    async fn install(&self, owner: &str, pairs: &[GeneratedPair]) -> Result<()> {
        let mut installed = self.installed.write().await;

        let mut claimed: HashMap<&str, &str> = HashMap::new();
        for pair in pairs {
            let channel = pair.stub.channel.as_str();
            let holder = installed
                .get(channel)
                .map(|existing| format!("{}::{}", existing.handler.owner, existing.stub.operation))
                .or_else(|| claimed.get(channel).map(|op| format!("{owner}::{op}")));
            if let Some(installed_by) = holder {
                return Err(RabbitCastError::DuplicateOperation {
                    channel: channel.to_string(),
                    owner: owner.to_string(),
                    installed_by,
                });
            }
            claimed.insert(channel, pair.stub.operation.as_str());
        }

        for pair in pairs {
            installed.insert(pair.stub.channel.clone(), Arc::new(pair.clone()));
        }
        // frozen under the table lock so a concurrent run cannot install the type twice
        self.frozen.write().await.insert(owner.to_string());
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("persist_dir", &self.persist_dir)
            .finish_non_exhaustive()
    }
}

fn synthesize_type(
    declarations: &[&RemoteDeclaration],
    skipped_non_void: &mut Vec<String>,
) -> Result<Vec<GeneratedPair>> {
    let mut pairs = Vec::with_capacity(declarations.len());
    for declaration in declarations {
        let signature = MethodSignature::parse(declaration.signature)?;
        if !signature.is_void() || declaration.invoke.is_none() {
            debug!(
                "Skipping {}::{}: returns a value",
                declaration.owner, declaration.name
            );
            skipped_non_void.push(format!("{}::{}", declaration.owner, declaration.name));
            continue;
        }
        pairs.push(synthesize(declaration, signature)?);
    }
    Ok(pairs)
}

fn persist(dir: &Path, owner: &str, pairs: &[GeneratedPair]) -> Result<()> {
    let manifest = TypeManifest {
        owner,
        operations: pairs
            .iter()
            .map(|pair| OperationManifest {
                operation: &pair.stub.operation,
                channel: &pair.stub.channel,
                handler: &pair.handler.name,
                signature: &pair.handler.encoded,
                params: &pair.stub.signature.params,
                is_static: pair.handler.is_static,
            })
            .collect(),
    };

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", owner.replace("::", ".")));
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
    debug!("Wrote manifest {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use futures_util::future::BoxFuture;
    use std::any::Any;

    fn noop(_: Arc<dyn Any + Send + Sync>, _: Vec<Value>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    const fn remote(
        owner: &'static str,
        name: &'static str,
        signature: &'static str,
        members: &'static [&'static str],
    ) -> RemoteDeclaration {
        RemoteDeclaration {
            owner,
            module: "app::chat",
            name,
            channel: name,
            signature,
            is_static: false,
            members,
            invoke: Some(noop),
        }
    }

    static NOTIFY: RemoteDeclaration = remote("app::chat::Chat", "notify", "(ILjava/lang/String;)V", &["notify"]);
    static COUNT: RemoteDeclaration = RemoteDeclaration {
        invoke: None,
        ..remote("app::chat::Chat", "count", "()I", &["count"])
    };
    static BROKEN: RemoteDeclaration = remote("app::chat::Broken", "bad", "(Ljava/lang/String)V", &["bad"]);
    static BROKEN_SIBLING: RemoteDeclaration = remote("app::chat::Broken", "fine", "(I)V", &["fine"]);
    static CLASH: RemoteDeclaration = remote("app::chat::Clash", "ping", "()V", &["ping", "ping_receive"]);
    static THIEF: RemoteDeclaration = remote("app::chat::Thief", "notify", "(J)V", &["notify"]);

    #[tokio::test]
    async fn test_transform_installs_void_operations_only() {
        let engine = Engine::new();
        let report = engine.transform_declarations([&NOTIFY, &COUNT]).await;

        assert!(report.is_clean());
        assert_eq!(report.transformed, vec!["app::chat::Chat"]);
        assert_eq!(report.operations, vec!["notify"]);
        assert_eq!(report.skipped_non_void, vec!["app::chat::Chat::count"]);
        assert!(engine.installed("count").await.is_none());

        let pair = engine.installed("notify").await.unwrap();
        assert_eq!(pair.handler.name, "notify_receive");
    }

    #[tokio::test]
    async fn test_transform_is_idempotent() {
        let engine = Engine::new();
        engine.transform_declarations([&NOTIFY]).await;
        let first = engine.installed("notify").await.unwrap();

        let report = engine.transform_declarations([&NOTIFY]).await;
        assert!(report.transformed.is_empty());
        assert_eq!(report.skipped_frozen, vec!["app::chat::Chat"]);
        assert!(Arc::ptr_eq(&first, &engine.installed("notify").await.unwrap()));
    }

    #[tokio::test]
    async fn test_failing_type_is_isolated() {
        let engine = Engine::new();
        let report = engine
            .transform_declarations([&BROKEN, &BROKEN_SIBLING, &CLASH, &NOTIFY])
            .await;

        assert_eq!(report.transformed, vec!["app::chat::Chat"]);
        let failed: Vec<_> = report.failures.iter().map(|(owner, _)| owner.as_str()).collect();
        assert_eq!(failed, vec!["app::chat::Broken", "app::chat::Clash"]);
        assert!(matches!(report.failures[0].1, RabbitCastError::Signature { .. }));
        assert!(matches!(report.failures[1].1, RabbitCastError::NameCollision { .. }));

        // the valid sibling of a broken declaration is not installed either
        assert!(engine.installed("fine").await.is_none());
        assert!(!engine.is_frozen("app::chat::Broken").await);
    }

    #[tokio::test]
    async fn test_duplicate_channel_is_rejected() {
        let engine = Engine::new();
        engine.transform_declarations([&NOTIFY]).await;
        let report = engine.transform_declarations([&THIEF]).await;

        match &report.failures[..] {
            [(owner, RabbitCastError::DuplicateOperation { installed_by, .. })] => {
                assert_eq!(owner, "app::chat::Thief");
                assert_eq!(installed_by, "app::chat::Chat::notify");
            }
            other => panic!("unexpected failures: {other:?}"),
        }
        assert_eq!(engine.installed("notify").await.unwrap().handler.owner, "app::chat::Chat");
    }

    #[test]
    fn test_scope_matching() {
        assert!(Scope::All.contains(&NOTIFY));
        assert!(Scope::Module("app".into()).contains(&NOTIFY));
        assert!(Scope::Module("app::chat".into()).contains(&NOTIFY));
        assert!(!Scope::Module("app::ch".into()).contains(&NOTIFY));
        assert!(Scope::Types(vec!["app::chat::Chat".into()]).contains(&NOTIFY));
        assert!(!Scope::Types(vec!["app::chat::Broken".into()]).contains(&NOTIFY));
    }

    #[tokio::test]
    async fn test_manifest_is_persisted() {
        let dir = std::env::temp_dir().join(format!("rabbitcast-manifest-{}", uuid::Uuid::new_v4()));
        let engine = Engine::new().with_persist_dir(&dir);
        engine.transform_declarations([&NOTIFY]).await;

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("app.chat.Chat.json")).unwrap()).unwrap();
        assert_eq!(manifest["owner"], "app::chat::Chat");
        assert_eq!(manifest["operations"][0]["handler"], "notify_receive");
        assert_eq!(manifest["operations"][0]["signature"], "(ILjava/lang/String;)V");

        std::fs::remove_dir_all(dir).unwrap();
    }
}
