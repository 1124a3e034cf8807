//! Robot-group coordinator: a shared working-memory view across
//! robots with active/passive roles and instant failover.
//!
//! Membership changes, remember fan-out, and event application are
//! serialized by the group lock. Database calls and extractor calls
//! never run under it; the lock only guards the membership maps and
//! the in-memory working memories are each guarded by their own lock.

use crate::channel::{GroupEvent, PubSubChannel};
use crate::store::{AddNode, LongTermMemory};
use crate::types::{AddOutcome, Robot};
use htm_core::error::{Error, Result};
use htm_core::working_memory::{AddRecord, WorkingMemory};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Default per-robot working-memory token budget.
pub const DEFAULT_WM_TOKENS: usize = 4000;

/// A robot registered in a group, with its in-memory working set.
#[derive(Clone)]
pub struct GroupRobot {
    /// The robot row
    pub robot: Robot,
    /// The robot's working memory
    pub memory: Arc<WorkingMemory>,
}

/// Group role of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Serves remember/recall traffic
    Active,
    /// Standby, promoted on failover
    Passive,
}

#[derive(Default)]
struct Membership {
    /// Insertion-ordered: the first active robot is the default primary.
    active: Vec<GroupRobot>,
    passive: Vec<GroupRobot>,
}

impl Membership {
    fn find(&self, name: &str) -> Option<(&GroupRobot, Role)> {
        if let Some(robot) = self.active.iter().find(|r| r.robot.name == name) {
            return Some((robot, Role::Active));
        }
        self.passive
            .iter()
            .find(|r| r.robot.name == name)
            .map(|robot| (robot, Role::Passive))
    }

    fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn all(&self) -> impl Iterator<Item = &GroupRobot> {
        self.active.iter().chain(self.passive.iter())
    }

    fn len(&self) -> usize {
        self.active.len() + self.passive.len()
    }
}

/// Group synchronization counters.
#[derive(Debug, Clone, Default)]
pub struct GroupStats {
    /// Active member count
    pub active_count: usize,
    /// Passive member count
    pub passive_count: usize,
    /// Nodes applied from peers' `added` events
    pub nodes_synced: u64,
    /// Records dropped from peers' `evicted` events
    pub evictions_synced: u64,
}

/// Coordinates a shared working-memory view across robots.
pub struct RobotGroup {
    name: String,
    store: Arc<LongTermMemory>,
    channel: PubSubChannel,
    membership: Mutex<Membership>,
    wm_max_tokens: usize,
    nodes_synced: AtomicU64,
    evictions_synced: AtomicU64,
}

impl RobotGroup {
    /// Create a group over the store with the default working-memory
    /// budget per robot.
    #[must_use]
    pub fn new(name: impl Into<String>, store: Arc<LongTermMemory>) -> Arc<Self> {
        Self::with_budget(name, store, DEFAULT_WM_TOKENS)
    }

    /// Create a group with an explicit per-robot token budget.
    #[must_use]
    pub fn with_budget(
        name: impl Into<String>,
        store: Arc<LongTermMemory>,
        wm_max_tokens: usize,
    ) -> Arc<Self> {
        let name = name.into();
        let channel = PubSubChannel::new(store.pool().clone(), &name);
        Arc::new(Self {
            name,
            store,
            channel,
            membership: Mutex::new(Membership::default()),
            wm_max_tokens,
            nodes_synced: AtomicU64::new(0),
            evictions_synced: AtomicU64::new(0),
        })
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group's pub/sub channel.
    #[must_use]
    pub fn channel(&self) -> &PubSubChannel {
        &self.channel
    }

    /// Wire the change callback and start the channel listener.
    ///
    /// Incoming events are applied on a spawned task so the listener
    /// never blocks on database fetches.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.channel.on_change(Box::new(move |event, node_id, robot_id| {
            if let Some(group) = weak.upgrade() {
                tokio::spawn(async move {
                    if let Err(e) = group.apply_event(event, node_id, robot_id).await {
                        warn!("Failed to apply group event: {}", e);
                    }
                });
            }
        }));
        self.channel.start_listening()
    }

    /// Stop the channel listener.
    pub async fn stop(&self) {
        self.channel.stop_listening().await;
    }

    /// Register an active robot, creating it in storage on first use.
    pub async fn add_active(&self, name: &str) -> Result<Robot> {
        self.add_member(name, Role::Active).await
    }

    /// Register a passive robot, creating it in storage on first use.
    pub async fn add_passive(&self, name: &str) -> Result<Robot> {
        self.add_member(name, Role::Passive).await
    }

    async fn add_member(&self, name: &str, role: Role) -> Result<Robot> {
        if self.membership.lock().contains(name) {
            return Err(Error::Validation(format!(
                "robot '{name}' is already a member of group '{}'",
                self.name
            )));
        }

        let robot = self.store.get_or_create_robot(name).await?;
        let member = GroupRobot {
            robot: robot.clone(),
            memory: Arc::new(WorkingMemory::new(self.wm_max_tokens)),
        };

        let had_members = {
            let mut membership = self.membership.lock();
            if membership.contains(name) {
                return Err(Error::Validation(format!(
                    "robot '{name}' is already a member of group '{}'",
                    self.name
                )));
            }
            let had = membership.len() > 0;
            match role {
                Role::Active => membership.active.push(member),
                Role::Passive => membership.passive.push(member),
            }
            had
        };

        if had_members {
            let synced = self.sync_robot(name).await?;
            debug!("Synced {} shared nodes to new member '{}'", synced, name);
        }
        info!("Robot '{}' joined group '{}' as {:?}", name, self.name, role);
        Ok(robot)
    }

    /// Remove a robot from the group, clearing its working-memory
    /// flags. The robot and its nodes are never deleted.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let member = {
            let mut membership = self.membership.lock();
            let Some((member, role)) = membership.find(name).map(|(m, r)| (m.clone(), r)) else {
                return Err(Error::NotFound(format!("robot '{name}' in group '{}'", self.name)));
            };
            match role {
                Role::Active => membership.active.retain(|r| r.robot.name != name),
                Role::Passive => membership.passive.retain(|r| r.robot.name != name),
            }
            member
        };

        self.store
            .clear_working_memory_flags(member.robot.id)
            .await?;
        member.memory.clear();
        info!("Robot '{}' left group '{}'", name, self.name);
        Ok(())
    }

    /// Move a passive robot to the active set.
    pub fn promote(&self, name: &str) -> Result<()> {
        let mut membership = self.membership.lock();
        let Some(index) = membership.passive.iter().position(|r| r.robot.name == name) else {
            return Err(Error::NotFound(format!("passive robot '{name}'")));
        };
        let member = membership.passive.remove(index);
        info!("Promoting robot '{}' in group '{}'", name, self.name);
        membership.active.push(member);
        Ok(())
    }

    /// Move an active robot to the passive set. Demoting the last
    /// active robot is an error.
    pub fn demote(&self, name: &str) -> Result<()> {
        let mut membership = self.membership.lock();
        let Some(index) = membership.active.iter().position(|r| r.robot.name == name) else {
            return Err(Error::NotFound(format!("active robot '{name}'")));
        };
        if membership.active.len() == 1 {
            return Err(Error::Validation(format!(
                "cannot demote '{name}': it is the last active robot in group '{}'",
                self.name
            )));
        }
        let member = membership.active.remove(index);
        info!("Demoting robot '{}' in group '{}'", name, self.name);
        membership.passive.push(member);
        Ok(())
    }

    /// Promote the first passive robot.
    pub fn failover(&self) -> Result<Robot> {
        let name = {
            let membership = self.membership.lock();
            membership
                .passive
                .first()
                .map(|r| r.robot.name.clone())
                .ok_or_else(|| {
                    Error::ResourceExhausted(format!(
                        "group '{}' has no passive robot to fail over to",
                        self.name
                    ))
                })?
        };
        self.promote(&name)?;
        let membership = self.membership.lock();
        let (member, _) = membership
            .find(&name)
            .ok_or_else(|| Error::NotFound(format!("robot '{name}'")))?;
        Ok(member.robot.clone())
    }

    /// Store content through the primary robot and fan it out to every
    /// member's working memory.
    ///
    /// The primary is the `originator` when it names a member, else
    /// the first active robot. The node is deduplicated by the store;
    /// every member's join row is flagged as working memory; the
    /// `added` event is published for cross-process members.
    pub async fn remember(
        &self,
        content: &str,
        originator: Option<&str>,
    ) -> Result<AddOutcome> {
        let (primary, others) = {
            let membership = self.membership.lock();
            if membership.active.is_empty() {
                return Err(Error::Validation(format!(
                    "group '{}' has no active robot",
                    self.name
                )));
            }
            let primary = originator
                .and_then(|name| membership.find(name).map(|(m, _)| m.clone()))
                .unwrap_or_else(|| membership.active[0].clone());
            let others: Vec<GroupRobot> = membership
                .all()
                .filter(|r| r.robot.id != primary.robot.id)
                .cloned()
                .collect();
            (primary, others)
        };

        let token_count = self.store.token_counter().count(content);
        if token_count > self.wm_max_tokens {
            return Err(Error::ResourceExhausted(format!(
                "content of {token_count} tokens can never fit the working-memory budget of {}",
                self.wm_max_tokens
            )));
        }
        let outcome = self
            .store
            .add_and_extract(AddNode {
                content: content.to_string(),
                token_count: token_count as i32,
                robot_id: primary.robot.id,
                embedding: None,
                metadata: serde_json::json!({}),
                working_memory: true,
            })
            .await?;

        // Make room in the primary's working set, persisting evictions.
        // A re-remembered node is already resident (dedup returns the
        // same id) and its re-add is token-neutral, so it never needs
        // space freed.
        if !primary.memory.contains(outcome.node_id) && !primary.memory.has_space(token_count) {
            let evicted = primary.memory.evict_to_make_space(token_count);
            let keys: Vec<i64> = evicted.iter().map(|e| e.key).collect();
            self.store.mark_evicted(primary.robot.id, &keys).await?;
            for key in keys {
                self.channel
                    .notify(GroupEvent::Evicted, Some(key), primary.robot.id)
                    .await?;
            }
        }
        primary
            .memory
            .add(outcome.node_id, AddRecord::new(content, token_count));

        // sync_node_to_members: every other member shares the node.
        for member in &others {
            self.store
                .link_robot_node(member.robot.id, outcome.node_id, true)
                .await?;
            member
                .memory
                .add_from_sync(outcome.node_id, AddRecord::new(content, token_count));
        }

        self.channel
            .notify(GroupEvent::Added, Some(outcome.node_id), primary.robot.id)
            .await?;
        Ok(outcome)
    }

    /// Clear every member's working memory, in storage and in memory,
    /// and publish the `cleared` event.
    pub async fn clear_working_memory(&self) -> Result<()> {
        let members: Vec<GroupRobot> = {
            let membership = self.membership.lock();
            membership.all().cloned().collect()
        };
        let Some(first) = members.first() else {
            return Ok(());
        };

        for member in &members {
            self.store
                .clear_working_memory_flags(member.robot.id)
                .await?;
            member.memory.clear_from_sync();
        }
        self.channel
            .notify(GroupEvent::Cleared, None, first.robot.id)
            .await?;
        Ok(())
    }

    /// Copy one member's working set to another, optionally clearing
    /// the source.
    pub async fn transfer_working_memory(
        &self,
        from: &str,
        to: &str,
        clear_source: bool,
    ) -> Result<usize> {
        let (source, target) = {
            let membership = self.membership.lock();
            let source = membership
                .find(from)
                .map(|(m, _)| m.clone())
                .ok_or_else(|| Error::NotFound(format!("robot '{from}'")))?;
            let target = membership
                .find(to)
                .map(|(m, _)| m.clone())
                .ok_or_else(|| Error::NotFound(format!("robot '{to}'")))?;
            (source, target)
        };

        let node_ids = self
            .store
            .working_memory_node_ids(source.robot.id)
            .await?;
        for node_id in &node_ids {
            self.store
                .link_robot_node(target.robot.id, *node_id, true)
                .await?;
            if let Some(node) = self.store.get_node(*node_id).await? {
                if node.deleted_at.is_none() {
                    target.memory.add_from_sync(
                        node.id,
                        AddRecord::new(node.content.clone(), node.token_count.max(0) as usize),
                    );
                }
            }
        }

        if clear_source {
            self.store
                .clear_working_memory_flags(source.robot.id)
                .await?;
            source.memory.clear_from_sync();
        }
        info!(
            "Transferred {} working-memory nodes from '{}' to '{}'",
            node_ids.len(),
            from,
            to
        );
        Ok(node_ids.len())
    }

    /// Sync a member to the union of every other member's working set.
    /// Idempotent; returns the number of nodes synced.
    pub async fn sync_robot(&self, name: &str) -> Result<usize> {
        let (target, others) = {
            let membership = self.membership.lock();
            let target = membership
                .find(name)
                .map(|(m, _)| m.clone())
                .ok_or_else(|| Error::NotFound(format!("robot '{name}'")))?;
            let others: Vec<GroupRobot> = membership
                .all()
                .filter(|r| r.robot.id != target.robot.id)
                .cloned()
                .collect();
            (target, others)
        };

        let mut union: HashSet<i64> = HashSet::new();
        for member in &others {
            for node_id in self.store.working_memory_node_ids(member.robot.id).await? {
                union.insert(node_id);
            }
        }

        let mut synced = 0usize;
        for node_id in union {
            self.store
                .link_robot_node(target.robot.id, node_id, true)
                .await?;
            if let Some(node) = self.store.get_node(node_id).await? {
                if node.deleted_at.is_none() {
                    target.memory.add_from_sync(
                        node.id,
                        AddRecord::new(node.content.clone(), node.token_count.max(0) as usize),
                    );
                }
            }
            synced += 1;
        }
        Ok(synced)
    }

    /// Whether every member's set of flagged node ids is identical.
    pub async fn in_sync(&self) -> Result<bool> {
        let members: Vec<GroupRobot> = {
            let membership = self.membership.lock();
            membership.all().cloned().collect()
        };
        if members.len() < 2 {
            return Ok(true);
        }

        let mut reference: Option<Vec<i64>> = None;
        for member in &members {
            let ids = self
                .store
                .working_memory_node_ids(member.robot.id)
                .await?;
            match &reference {
                None => reference = Some(ids),
                Some(expected) if *expected == ids => {}
                Some(_) => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Apply a channel event to the local members.
    ///
    /// `added` fetches the node and inserts it into every non-
    /// originator working memory; `evicted` removes it; `cleared`
    /// empties them. Sync insertions that overflow a member's budget
    /// evict locally and persist the flag flips without re-notifying.
    pub async fn apply_event(
        &self,
        event: GroupEvent,
        node_id: Option<i64>,
        robot_id: i64,
    ) -> Result<()> {
        let members: Vec<GroupRobot> = {
            let membership = self.membership.lock();
            membership
                .all()
                .filter(|r| r.robot.id != robot_id)
                .cloned()
                .collect()
        };

        match event {
            GroupEvent::Added => {
                let Some(node_id) = node_id else {
                    return Err(Error::Validation("added event without node_id".to_string()));
                };
                let Some(node) = self.store.get_node(node_id).await? else {
                    debug!("Sync skipped: node {} is gone", node_id);
                    return Ok(());
                };
                if node.deleted_at.is_some() {
                    return Ok(());
                }
                let tokens = node.token_count.max(0) as usize;
                for member in &members {
                    // A duplicate added event for a resident node is a
                    // token-neutral overwrite; only a genuinely new
                    // record needs space freed.
                    if !member.memory.contains(node.id) && !member.memory.has_space(tokens) {
                        let evicted = member.memory.evict_to_make_space(tokens);
                        let keys: Vec<i64> = evicted.iter().map(|e| e.key).collect();
                        self.store.mark_evicted(member.robot.id, &keys).await?;
                    }
                    member
                        .memory
                        .add_from_sync(node.id, AddRecord::new(node.content.clone(), tokens));
                }
                self.nodes_synced.fetch_add(1, Ordering::Relaxed);
                self.store
                    .telemetry()
                    .counter("group_nodes_synced")
                    .increment();
            }
            GroupEvent::Evicted => {
                let Some(node_id) = node_id else {
                    return Err(Error::Validation("evicted event without node_id".to_string()));
                };
                for member in &members {
                    member.memory.remove_from_sync(node_id);
                }
                self.evictions_synced.fetch_add(1, Ordering::Relaxed);
                self.store
                    .telemetry()
                    .counter("group_evictions_synced")
                    .increment();
            }
            GroupEvent::Cleared => {
                for member in &members {
                    member.memory.clear_from_sync();
                }
            }
        }
        Ok(())
    }

    /// A member's working memory, for recall and context assembly.
    #[must_use]
    pub fn member_memory(&self, name: &str) -> Option<Arc<WorkingMemory>> {
        let membership = self.membership.lock();
        membership.find(name).map(|(m, _)| Arc::clone(&m.memory))
    }

    /// A member's role, when it is a member.
    #[must_use]
    pub fn member_role(&self, name: &str) -> Option<Role> {
        let membership = self.membership.lock();
        membership.find(name).map(|(_, role)| role)
    }

    /// Synchronization counters and membership sizes.
    #[must_use]
    pub fn stats(&self) -> GroupStats {
        let membership = self.membership.lock();
        GroupStats {
            active_count: membership.active.len(),
            passive_count: membership.passive.len(),
            nodes_synced: self.nodes_synced.load(Ordering::Relaxed),
            evictions_synced: self.evictions_synced.load(Ordering::Relaxed),
        }
    }
}
