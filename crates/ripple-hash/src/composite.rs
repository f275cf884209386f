//! Composite hashes over declared dependency graphs.
//!
//! A composite hash folds an entity's attribute fingerprint with the hashes of
//! every member of its dependency relations. Members are hashed recursively:
//! their own declared dependencies and any nested sub-paths requested by the
//! parent are folded into their contribution.
//!
//! ```text
//! article ── comments ──▶ comment:1 ── author ──▶ author:7
//!         └─ author ────▶ author:7
//! ```
//!
//! Diamonds like `author:7` above are folded once per `compute_hashes` call
//! for each distinct set of sub-paths requested of them; later paths reuse the
//! memoized result. An entity reached again on its own recursion path is a
//! cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use futures::FutureExt;
use futures::future::BoxFuture;
use ripple_core::EntityRef;
use ripple_core::entities::NewDependencyLink;
use serde_json::{Value, json};

use crate::HashEngine;
use crate::entity::TrackedEntity;
use crate::error::HashError;
use crate::fingerprint::{canonical_hash, fingerprint};

/// Freshly computed hashes for one entity and the edges behind them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHashes {
    pub attribute_hash: String,
    /// `None` when the entity declares no dependencies.
    pub composite_hash: Option<String>,
    /// Every entity that contributed, sorted and deduplicated.
    pub links: Vec<NewDependencyLink>,
}

impl EntityHashes {
    #[must_use]
    pub fn effective_hash(&self) -> &str {
        self.composite_hash.as_deref().unwrap_or(&self.attribute_hash)
    }
}

/// Relation paths as a tree: `["a", "a.b", "c"]` becomes `{a: {b: {}}, c: {}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct PathTree(BTreeMap<String, PathTree>);

impl PathTree {
    pub(crate) fn parse<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut tree = Self::default();
        for path in paths {
            let mut node = &mut tree;
            for segment in path.as_ref().split('.').filter(|s| !s.is_empty()) {
                node = node.0.entry(segment.to_string()).or_default();
            }
        }
        tree
    }

    fn merge(&mut self, other: Self) {
        for (relation, subtree) in other.0 {
            self.0.entry(relation).or_default().merge(subtree);
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A folded hash with links named relative to the folded entity.
#[derive(Clone)]
struct Folded {
    hash: String,
    links: Vec<NewDependencyLink>,
    /// Every member visited below the folded entity.
    reach: BTreeSet<EntityRef>,
}

/// Member folds of one `compute_hashes` call, keyed by member and the
/// sub-paths inherited from its parent.
type Memo = HashMap<(EntityRef, PathTree), Folded>;

impl HashEngine {
    /// Compute the attribute and composite hash of an entity.
    ///
    /// # Errors
    ///
    /// `HashError::NoHashableAttributes` for the entity or any member,
    /// `HashError::CyclicDependency` when a member is reached again on its own
    /// path, and source or store errors encountered while resolving relations.
    pub async fn compute_hashes(&self, entity: &dyn TrackedEntity) -> Result<EntityHashes, HashError> {
        let attribute_hash = fingerprint(entity)?;
        let tree = PathTree::parse(&entity.composite_dependencies());
        if tree.is_empty() {
            return Ok(EntityHashes {
                attribute_hash,
                composite_hash: None,
                links: Vec::new(),
            });
        }

        let mut memo = Memo::new();
        let folded = self
            .fold(entity, attribute_hash.clone(), tree, vec![entity.entity_ref()], &mut memo)
            .await?;

        Ok(EntityHashes {
            attribute_hash,
            composite_hash: Some(folded.hash),
            links: folded.links,
        })
    }

    /// Hash of a dependency member: its fingerprint alone when it has nothing
    /// to fold, otherwise the fold over its own and inherited sub-paths.
    fn member_hash<'a>(
        &'a self,
        member: &'a dyn TrackedEntity,
        inherited: PathTree,
        path: Vec<EntityRef>,
        memo: &'a mut Memo,
    ) -> BoxFuture<'a, Result<Folded, HashError>> {
        async move {
            let own = fingerprint(member)?;
            let mut tree = PathTree::parse(&member.composite_dependencies());
            tree.merge(inherited.clone());
            let folded = if tree.is_empty() {
                Folded {
                    hash: own,
                    links: Vec::new(),
                    reach: BTreeSet::new(),
                }
            } else {
                self.fold(member, own, tree, path, &mut *memo).await?
            };
            memo.insert((member.entity_ref(), inherited), folded.clone());
            Ok(folded)
        }
        .boxed()
    }

    fn fold<'a>(
        &'a self,
        entity: &'a dyn TrackedEntity,
        own_hash: String,
        tree: PathTree,
        path: Vec<EntityRef>,
        memo: &'a mut Memo,
    ) -> BoxFuture<'a, Result<Folded, HashError>> {
        async move {
            let owner = entity.entity_ref();
            let source = self.registry.source(&owner.entity_type)?;
            let mut deps: Vec<Value> = Vec::with_capacity(tree.0.len());
            let mut links = Vec::new();
            let mut reach = BTreeSet::new();

            for (relation, subtree) in tree.0 {
                let mut members = source.related(entity, &relation).await?;
                members.sort();
                members.dedup();

                let mut contributions: Vec<Value> = Vec::with_capacity(members.len());
                for member_ref in members {
                    if path.contains(&member_ref) {
                        let mut cycle = path.clone();
                        cycle.push(member_ref);
                        return Err(HashError::CyclicDependency { path: cycle });
                    }
                    reach.insert(member_ref.clone());

                    let folded = match recall(memo, &member_ref, &subtree, &path) {
                        Some(folded) => Some(folded),
                        None => match self.registry.load(&member_ref).await? {
                            Some(member) => {
                                let mut next = path.clone();
                                next.push(member_ref.clone());
                                let folded = self
                                    .member_hash(member.as_ref(), subtree.clone(), next, &mut *memo)
                                    .await?;
                                Some(folded)
                            }
                            None => None,
                        },
                    };
                    let hash = match folded {
                        Some(folded) => {
                            links.extend(folded.links.into_iter().map(|link| NewDependencyLink {
                                relation_name: format!("{relation}.{}", link.relation_name),
                                dependent: link.dependent,
                            }));
                            reach.extend(folded.reach);
                            Some(folded.hash)
                        }
                        None => self.last_known_hash(&member_ref).await?,
                    };

                    let Some(hash) = hash else {
                        tracing::debug!(
                            owner = %owner,
                            member = %member_ref,
                            relation = %relation,
                            "dependency has no source entity or stored hash; skipped"
                        );
                        continue;
                    };
                    contributions.push(json!([member_ref.to_string(), hash]));
                    links.push(NewDependencyLink {
                        relation_name: relation.clone(),
                        dependent: member_ref,
                    });
                }
                deps.push(json!([relation, contributions]));
            }

            links.sort();
            links.dedup();
            Ok(Folded {
                hash: canonical_hash(&json!({ "self": own_hash, "deps": deps })),
                links,
                reach,
            })
        }
        .boxed()
    }

    /// Effective hash of the latest stored record, tombstoned or not.
    async fn last_known_hash(&self, entity: &EntityRef) -> Result<Option<String>, HashError> {
        Ok(self
            .store
            .find_latest_hash(&entity.entity_type, &entity.entity_id)
            .await?
            .map(|record| record.effective_hash().to_string()))
    }
}

/// A memoized fold of `member`, unless one of its members sits on `path`:
/// that case is refolded so the cycle is reported along this path.
fn recall(memo: &Memo, member: &EntityRef, inherited: &PathTree, path: &[EntityRef]) -> Option<Folded> {
    let hit = memo.get(&(member.clone(), inherited.clone()))?;
    hit.reach
        .iter()
        .all(|r| !path.contains(r))
        .then(|| hit.clone())
}
