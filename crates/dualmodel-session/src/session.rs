//! Session and unit of work.
//!
//! A [`Session`] tracks instances added to or loaded from an [`Engine`] and
//! writes their changes back on [`flush`](Session::flush).
//!
//! - New objects get their autoincrement key and persistence identity on
//!   flush; the identity map then returns the same handle for that row.
//! - Related instances reachable through relationship fields are saved
//!   along with the object (parents first), and foreign key columns are
//!   synchronized from the relationship values.
//! - Loading hydrates every relationship eagerly through the identity map,
//!   so cycles resolve to the same objects.
//! - Changes are recorded per transaction; [`rollback`](Session::rollback)
//!   reverts them in the engine.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dualmodel_core::{
    CollectionKind, ColumnDescriptor, Error, IdentityKey, Instance, ModelDescriptor,
    PassiveDeletes, RelationshipInfo, RelationshipKind, Result, Value,
};
use dualmodel_schema::{Registry, mapping_key};

use crate::codec;
use crate::engine::{Change, Engine, Row};

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Flush pending changes before every `get`.
    pub autoflush: bool,
    /// Expire objects after commit; expired objects are reloaded from the
    /// engine the next time they are fetched.
    pub expire_on_commit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autoflush: false,
            expire_on_commit: true,
        }
    }
}

// ============================================================================
// Object Key and State
// ============================================================================

/// Key of a persistent object in the identity map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    table: String,
    /// Hash of the primary key value(s).
    pk_hash: u64,
}

impl ObjectKey {
    pub fn from_identity(identity: &IdentityKey) -> Self {
        Self {
            table: identity.table.clone(),
            pk_hash: hash_values(&identity.primary_key),
        }
    }
}

/// Hash a slice of values for use as a primary key hash.
fn hash_values(values: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for v in values {
        hash_value(v, &mut hasher);
    }
    hasher.finish()
}

fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            5u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            6u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            7u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Time(t) => {
            8u8.hash(hasher);
            t.hash(hasher);
        }
        Value::Timestamp(ts) => {
            9u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            10u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            11u8.hash(hasher);
            j.to_string().hash(hasher);
        }
        Value::Array(arr) => {
            12u8.hash(hasher);
            arr.len().hash(hasher);
            for item in arr {
                hash_value(item, hasher);
            }
        }
        Value::Object(map) => {
            13u8.hash(hasher);
            map.len().hash(hasher);
            for (key, item) in map {
                key.hash(hasher);
                hash_value(item, hasher);
            }
        }
        Value::Model(instance) => {
            14u8.hash(hasher);
            instance.object_id().hash(hasher);
        }
    }
}

/// State of a tracked object in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// New object, inserted on flush.
    New,
    /// Persistent object loaded from or written to the engine.
    Persistent,
    /// Object marked for deletion, deleted on flush.
    Deleted,
    /// Object detached from session.
    Detached,
    /// Object expired, reloaded on next fetch.
    Expired,
}

struct Tracked {
    instance: Instance,
    state: ObjectState,
    /// Row as last read from or written to the engine, for dirty checking.
    original: Option<Row>,
}

/// Many-to-many collection to mirror into its link table.
struct LinkSync {
    rel: RelationshipInfo,
    local: Instance,
    remotes: Vec<Instance>,
}

/// Bookkeeping of one flush walk.
#[derive(Default)]
struct Walk {
    visiting: HashSet<u64>,
    done: HashSet<u64>,
    links: Vec<LinkSync>,
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
pub struct Session<'a> {
    engine: &'a Engine,
    registry: &'a Registry,
    config: SessionConfig,
    /// Tracked objects by object id.
    objects: HashMap<u64, Tracked>,
    /// Identity map: persistence identity -> object id.
    identity_map: HashMap<ObjectKey, u64>,
    pending_new: Vec<u64>,
    pending_delete: Vec<u64>,
    in_transaction: bool,
    /// Engine changes of the current transaction.
    changes: Vec<Change>,
    /// Objects inserted during the current transaction.
    flushed_new: Vec<u64>,
    /// Objects deleted during the current transaction.
    flushed_deleted: Vec<(Instance, IdentityKey)>,
}

impl<'a> Session<'a> {
    pub fn new(engine: &'a Engine, registry: &'a Registry) -> Self {
        Self::with_config(engine, registry, SessionConfig::default())
    }

    pub fn with_config(engine: &'a Engine, registry: &'a Registry, config: SessionConfig) -> Self {
        Self {
            engine,
            registry,
            config,
            objects: HashMap::new(),
            identity_map: HashMap::new(),
            pending_new: Vec::new(),
            pending_delete: Vec::new(),
            in_transaction: false,
            changes: Vec::new(),
            flushed_new: Vec::new(),
            flushed_deleted: Vec::new(),
        }
    }

    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Add an instance of a table model to the session.
    ///
    /// New objects are inserted on the next flush, together with every
    /// table instance reachable through their relationship fields.
    #[tracing::instrument(level = "debug", skip(self, instance))]
    pub fn add(&mut self, instance: &Instance) -> Result<()> {
        let descriptor = instance.model();
        table_name(&descriptor)?;
        tracing::info!(
            model = %descriptor.name,
            table = ?descriptor.table_name,
            "Adding object to session"
        );
        self.track(instance, true).map(|_| ())
    }

    /// Mark an instance for deletion on the next flush.
    ///
    /// A pending new object is simply forgotten.
    #[tracing::instrument(level = "debug", skip(self, instance))]
    pub fn delete(&mut self, instance: &Instance) -> Result<()> {
        let id = instance.object_id();
        tracing::info!(model = %instance.model_name(), "Marking object for deletion");

        if !self.objects.contains_key(&id) {
            if instance.identity().is_none() {
                return Err(Error::Custom(format!(
                    "{} instance is not persistent",
                    instance.model_name()
                )));
            }
            self.track(instance, true)?;
        }
        let Some(state) = self.state_of(instance) else {
            return Ok(());
        };
        match state {
            ObjectState::New => {
                self.objects.remove(&id);
                self.pending_new.retain(|k| *k != id);
            }
            ObjectState::Persistent | ObjectState::Expired => {
                self.set_state(id, ObjectState::Deleted);
                self.pending_delete.push(id);
            }
            ObjectState::Deleted | ObjectState::Detached => {}
        }
        Ok(())
    }

    /// Fetch a row by its single-column primary key.
    pub fn get(&mut self, model: &str, pk: impl Into<Value>) -> Result<Option<Instance>> {
        self.get_by_key(model, vec![pk.into()])
    }

    /// Fetch a row by primary key values in key order.
    ///
    /// The identity map is consulted first; a tracked object is returned as
    /// the same handle, reloaded if it was expired.
    #[tracing::instrument(level = "debug", skip(self, key))]
    pub fn get_by_key(&mut self, model: &str, key: Vec<Value>) -> Result<Option<Instance>> {
        if self.config.autoflush {
            self.flush()?;
        }
        let descriptor = self
            .registry
            .descriptor(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))?;
        let table = table_name(&descriptor)?.to_string();
        tracing::debug!(model, table = %table, "Getting object by primary key");

        let identity = IdentityKey {
            table,
            primary_key: key,
        };
        if let Some(existing) = self.tracked_by_identity(&identity) {
            match self.state_of(&existing) {
                Some(ObjectState::Deleted | ObjectState::Detached) => return Ok(None),
                Some(ObjectState::Expired) => {
                    let Some(row) = self.engine.find(&identity.table, &identity.primary_key)
                    else {
                        self.forget(&existing);
                        return Ok(None);
                    };
                    self.populate(&existing, &descriptor, row)?;
                    self.hydrate(&existing)?;
                }
                _ => {}
            }
            return Ok(Some(existing));
        }

        match self.engine.find(&identity.table, &identity.primary_key) {
            Some(row) => self.load(&descriptor, row).map(Some),
            None => Ok(None),
        }
    }

    /// Reload an instance's columns and relationships from the engine.
    #[tracing::instrument(level = "debug", skip(self, instance))]
    pub fn refresh(&mut self, instance: &Instance) -> Result<()> {
        let identity = instance.identity().ok_or_else(|| {
            Error::Custom(format!(
                "{} instance is not persistent",
                instance.model_name()
            ))
        })?;
        let row = self
            .engine
            .find(&identity.table, &identity.primary_key)
            .ok_or_else(|| {
                Error::Storage(format!(
                    "{}: row {:?} no longer exists",
                    identity.table, identity.primary_key
                ))
            })?;
        if !self.objects.contains_key(&instance.object_id()) {
            self.register(instance, &identity, row.clone());
        }
        let descriptor = instance.model();
        self.populate(instance, &descriptor, row)?;
        self.hydrate(instance)
    }

    /// Check if an instance is tracked by this session.
    pub fn contains(&self, instance: &Instance) -> bool {
        self.state_of(instance)
            .is_some_and(|s| s != ObjectState::Detached)
    }

    pub fn state_of(&self, instance: &Instance) -> Option<ObjectState> {
        self.objects.get(&instance.object_id()).map(|t| t.state)
    }

    /// Detach an instance from the session.
    pub fn expunge(&mut self, instance: &Instance) {
        let id = instance.object_id();
        if let Some(tracked) = self.objects.get_mut(&id) {
            tracked.state = ObjectState::Detached;
        }
        if let Some(identity) = instance.identity() {
            let key = ObjectKey::from_identity(&identity);
            if self.identity_map.get(&key) == Some(&id) {
                self.identity_map.remove(&key);
            }
        }
        self.pending_new.retain(|k| *k != id);
        self.pending_delete.retain(|k| *k != id);
    }

    /// Detach all objects from the session.
    pub fn expunge_all(&mut self) {
        for tracked in self.objects.values_mut() {
            tracked.state = ObjectState::Detached;
        }
        self.identity_map.clear();
        self.pending_new.clear();
        self.pending_delete.clear();
    }

    // ========================================================================
    // Transaction Management
    // ========================================================================

    /// Write pending changes to the engine without committing.
    ///
    /// Deletes run first, then inserts and updates. After a failed flush the
    /// transaction should be rolled back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<()> {
        self.cascade()?;
        tracing::info!(
            inserts = self.pending_new.len(),
            deletes = self.pending_delete.len(),
            "Starting flush"
        );
        self.in_transaction = true;

        for id in std::mem::take(&mut self.pending_delete) {
            if let Some(instance) = self.instance_of(id) {
                self.delete_instance(&instance)?;
            }
        }

        let mut order = std::mem::take(&mut self.pending_new);
        let mut persistent: Vec<u64> = self
            .objects
            .iter()
            .filter(|(_, t)| matches!(t.state, ObjectState::Persistent | ObjectState::Expired))
            .map(|(id, _)| *id)
            .collect();
        persistent.sort_unstable();
        order.extend(persistent);

        let mut walk = Walk::default();
        for id in order {
            if let Some(instance) = self.instance_of(id) {
                self.save(&instance, &mut walk)?;
            }
        }
        for link in &walk.links {
            self.sync_links(link)?;
        }
        tracing::info!(changes = self.changes.len(), "Flush completed");
        Ok(())
    }

    /// Flush and commit the current transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<()> {
        tracing::info!("Committing transaction");
        self.flush()?;

        self.changes.clear();
        self.flushed_new.clear();
        self.flushed_deleted.clear();
        self.in_transaction = false;

        if self.config.expire_on_commit {
            for tracked in self.objects.values_mut() {
                if tracked.state == ObjectState::Persistent {
                    tracked.state = ObjectState::Expired;
                }
            }
        }
        Ok(())
    }

    /// Revert everything flushed since the last commit and drop pending
    /// changes.
    ///
    /// Objects inserted in the transaction lose their identity; objects
    /// deleted in it are tracked again. Every persistent object is expired.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) {
        tracing::info!(changes = self.changes.len(), "Rolling back transaction");
        self.engine.revert(std::mem::take(&mut self.changes));
        self.pending_new.clear();
        self.pending_delete.clear();

        for id in std::mem::take(&mut self.flushed_new) {
            if let Some(tracked) = self.objects.remove(&id) {
                if let Some(identity) = tracked.instance.identity() {
                    self.identity_map.remove(&ObjectKey::from_identity(&identity));
                }
                tracked.instance.set_identity(None);
            }
        }
        self.objects.retain(|_, t| t.state != ObjectState::New);
        for tracked in self.objects.values_mut() {
            if matches!(tracked.state, ObjectState::Persistent | ObjectState::Deleted) {
                tracked.state = ObjectState::Expired;
            }
        }
        for (instance, identity) in std::mem::take(&mut self.flushed_deleted) {
            self.identity_map
                .insert(ObjectKey::from_identity(&identity), instance.object_id());
            self.objects.insert(
                instance.object_id(),
                Tracked {
                    instance,
                    state: ObjectState::Expired,
                    original: None,
                },
            );
        }
        self.in_transaction = false;
    }

    // ========================================================================
    // Debug Diagnostics
    // ========================================================================

    /// Get count of objects pending INSERT.
    pub fn pending_new_count(&self) -> usize {
        self.pending_new.len()
    }

    /// Get count of objects pending DELETE.
    pub fn pending_delete_count(&self) -> usize {
        self.pending_delete.len()
    }

    /// Get total tracked object count.
    pub fn tracked_count(&self) -> usize {
        self.objects
            .values()
            .filter(|t| t.state != ObjectState::Detached)
            .count()
    }

    /// Whether changes were flushed since the last commit or rollback.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Dump session state for debugging.
    pub fn debug_state(&self) -> SessionDebugInfo {
        SessionDebugInfo {
            tracked: self.tracked_count(),
            pending_new: self.pending_new_count(),
            pending_delete: self.pending_delete_count(),
            changes: self.changes.len(),
            in_transaction: self.in_transaction,
        }
    }

    // ========================================================================
    // Tracking internals
    // ========================================================================

    /// Start tracking `instance`. With `strict` off, returns `false` instead
    /// of failing when its row is gone or another object holds its identity.
    fn track(&mut self, instance: &Instance, strict: bool) -> Result<bool> {
        let id = instance.object_id();
        if let Some(state) = self.objects.get(&id).map(|t| t.state) {
            match state {
                ObjectState::Deleted => {
                    self.set_state(id, ObjectState::Persistent);
                    self.pending_delete.retain(|k| *k != id);
                }
                ObjectState::Detached => {
                    self.objects.remove(&id);
                    return self.track(instance, strict);
                }
                _ => {}
            }
            return Ok(true);
        }

        match instance.identity() {
            Some(identity) => {
                if self
                    .engine
                    .find(&identity.table, &identity.primary_key)
                    .is_none()
                {
                    if strict {
                        return Err(Error::Storage(format!(
                            "{}: row {:?} no longer exists",
                            identity.table, identity.primary_key
                        )));
                    }
                    return Ok(false);
                }
                let key = ObjectKey::from_identity(&identity);
                if self.identity_map.contains_key(&key) {
                    if strict {
                        return Err(Error::Custom(format!(
                            "another {} instance with key {:?} is already in this session",
                            instance.model_name(),
                            identity.primary_key
                        )));
                    }
                    return Ok(false);
                }
                self.identity_map.insert(key, id);
                self.objects.insert(
                    id,
                    Tracked {
                        instance: instance.clone(),
                        state: ObjectState::Persistent,
                        original: None,
                    },
                );
            }
            None => {
                self.objects.insert(
                    id,
                    Tracked {
                        instance: instance.clone(),
                        state: ObjectState::New,
                        original: None,
                    },
                );
                self.pending_new.push(id);
            }
        }
        Ok(true)
    }

    /// Track every table instance reachable from tracked objects.
    fn cascade(&mut self) -> Result<()> {
        let mut queue: Vec<Instance> = self
            .objects
            .values()
            .filter(|t| {
                matches!(
                    t.state,
                    ObjectState::New | ObjectState::Persistent | ObjectState::Expired
                )
            })
            .map(|t| t.instance.clone())
            .collect();
        queue.sort_by_key(|i| std::cmp::Reverse(i.object_id()));

        while let Some(instance) = queue.pop() {
            for related in related_instances(&instance) {
                let id = related.object_id();
                if self.objects.contains_key(&id)
                    || self.was_deleted(id)
                    || !related.model().is_table()
                {
                    continue;
                }
                if self.track(&related, false)? {
                    tracing::trace!(
                        model = %related.model_name(),
                        "Cascading save to related object"
                    );
                    queue.push(related);
                }
            }
        }
        Ok(())
    }

    fn register(&mut self, instance: &Instance, identity: &IdentityKey, row: Row) {
        let id = instance.object_id();
        self.identity_map
            .insert(ObjectKey::from_identity(identity), id);
        self.objects.insert(
            id,
            Tracked {
                instance: instance.clone(),
                state: ObjectState::Persistent,
                original: Some(row),
            },
        );
    }

    fn forget(&mut self, instance: &Instance) {
        let id = instance.object_id();
        self.objects.remove(&id);
        if let Some(identity) = instance.identity() {
            self.identity_map.remove(&ObjectKey::from_identity(&identity));
        }
    }

    fn set_state(&mut self, id: u64, state: ObjectState) {
        if let Some(tracked) = self.objects.get_mut(&id) {
            tracked.state = state;
        }
    }

    fn instance_of(&self, id: u64) -> Option<Instance> {
        self.objects.get(&id).map(|t| t.instance.clone())
    }

    fn tracked_by_identity(&self, identity: &IdentityKey) -> Option<Instance> {
        let id = self.identity_map.get(&ObjectKey::from_identity(identity))?;
        self.objects
            .get(id)
            .map(|t| t.instance.clone())
            .filter(|i| i.identity().as_ref() == Some(identity))
    }

    fn was_deleted(&self, id: u64) -> bool {
        self.flushed_deleted
            .iter()
            .any(|(i, _)| i.object_id() == id)
    }

    fn target_of(&self, rel: &RelationshipInfo) -> Result<Arc<ModelDescriptor>> {
        self.registry
            .descriptor(&rel.target)
            .ok_or_else(|| Error::UnknownModel(rel.target.clone()))
    }

    // ========================================================================
    // Writing
    // ========================================================================

    fn save(&mut self, instance: &Instance, walk: &mut Walk) -> Result<()> {
        let id = instance.object_id();
        let descriptor = instance.model();
        if walk.visiting.contains(&id) || self.was_deleted(id) || !descriptor.is_table() {
            return Ok(());
        }
        if walk.done.contains(&id) {
            return self.write_row(instance, &descriptor);
        }
        if !self.objects.contains_key(&id) && !self.track(instance, false)? {
            return Ok(());
        }
        walk.visiting.insert(id);

        // Parents first, then copy their keys into our foreign key columns.
        for (field, rel) in descriptor.relationships() {
            if rel.kind != RelationshipKind::ManyToOne {
                continue;
            }
            let (Some(local_key), Some(Value::Model(parent))) =
                (&rel.local_key, instance.get(&field.name))
            else {
                continue;
            };
            if !parent.is_instance_of(&rel.target) || self.was_deleted(parent.object_id()) {
                continue;
            }
            self.save(&parent, walk)?;
            let referenced = referenced_column(&descriptor, local_key)?;
            let value = column_value(&parent, &parent.model(), &referenced);
            if !value.is_null() {
                set_column(instance, &descriptor, local_key, value)?;
            }
        }

        self.write_row(instance, &descriptor)?;
        walk.done.insert(id);

        for (field, rel) in descriptor.relationships() {
            let related: Vec<Instance> = flatten(&instance.get(&field.name).unwrap_or_default())
                .into_iter()
                .filter(|r| r.is_instance_of(&rel.target))
                .collect();
            match rel.kind {
                RelationshipKind::OneToOne | RelationshipKind::OneToMany => {
                    let Some(remote_key) = &rel.remote_key else {
                        continue;
                    };
                    let target = self.target_of(rel)?;
                    let referenced = referenced_column(&target, remote_key)?;
                    let value = column_value(instance, &descriptor, &referenced);
                    for child in related {
                        if self.was_deleted(child.object_id()) {
                            continue;
                        }
                        set_column(&child, &target, remote_key, value.clone())?;
                        self.save(&child, walk)?;
                    }
                }
                RelationshipKind::ManyToMany => {
                    for remote in &related {
                        self.save(remote, walk)?;
                    }
                    // Deleted or stale remotes get no link row.
                    let remotes = related
                        .into_iter()
                        .filter(|r| self.objects.contains_key(&r.object_id()))
                        .collect();
                    walk.links.push(LinkSync {
                        rel: rel.clone(),
                        local: instance.clone(),
                        remotes,
                    });
                }
                RelationshipKind::ManyToOne => {}
            }
        }
        walk.visiting.remove(&id);
        Ok(())
    }

    /// Insert a new object or update a changed persistent one.
    fn write_row(&mut self, instance: &Instance, descriptor: &ModelDescriptor) -> Result<()> {
        let id = instance.object_id();
        let Some(state) = self.state_of(instance) else {
            return Ok(());
        };
        let table = table_name(descriptor)?;
        let row = encode(descriptor, instance)?;

        match state {
            ObjectState::New => {
                let stored = self.engine.insert(table, row, &mut self.changes)?;
                for (field, column) in descriptor.columns().filter(|(_, c)| c.primary_key) {
                    let value = codec::from_stored(
                        column,
                        stored.get(&column.name).cloned().unwrap_or_default(),
                    )?;
                    if instance.get(&field.name).as_ref() != Some(&value) {
                        instance.set_unchecked(&field.name, value)?;
                    }
                }
                let identity = identity_of(descriptor, &stored);
                tracing::debug!(
                    table,
                    key = ?identity.primary_key,
                    "Inserted object"
                );
                instance.set_identity(Some(identity.clone()));
                self.identity_map
                    .insert(ObjectKey::from_identity(&identity), id);
                self.flushed_new.push(id);
                if let Some(tracked) = self.objects.get_mut(&id) {
                    tracked.state = ObjectState::Persistent;
                    tracked.original = Some(stored);
                }
            }
            ObjectState::Persistent | ObjectState::Expired => {
                let unchanged = self
                    .objects
                    .get(&id)
                    .and_then(|t| t.original.as_ref())
                    == Some(&row);
                if !unchanged {
                    self.engine.update(table, row.clone(), &mut self.changes)?;
                    if let Some(tracked) = self.objects.get_mut(&id) {
                        tracked.original = Some(row);
                    }
                }
            }
            ObjectState::Deleted | ObjectState::Detached => {}
        }
        Ok(())
    }

    /// Delete `instance` with its ORM-level cascades.
    fn delete_instance(&mut self, instance: &Instance) -> Result<()> {
        let descriptor = instance.model();
        let table = table_name(&descriptor)?.to_string();
        let Some(identity) = instance.identity() else {
            return Ok(());
        };

        for (_, rel) in descriptor.relationships() {
            if rel.passive_deletes == PassiveDeletes::All {
                continue;
            }
            match rel.kind {
                RelationshipKind::OneToOne | RelationshipKind::OneToMany => {
                    let Some(remote_key) = &rel.remote_key else {
                        continue;
                    };
                    let target = self.target_of(rel)?;
                    let referenced = referenced_column(&target, remote_key)?;
                    let value = column_value(instance, &descriptor, &referenced);
                    for row in self.engine.select_by(&rel.target_table, remote_key, &value) {
                        let key = identity_of(&target, &row);
                        let loaded = self.tracked_by_identity(&key);
                        if rel.cascade_delete {
                            let child = match loaded {
                                Some(child) => child,
                                None => self.load(&target, row)?,
                            };
                            tracing::trace!(model = %target.name, "Cascading delete");
                            self.delete_instance(&child)?;
                        } else if loaded.is_some() || rel.passive_deletes == PassiveDeletes::False
                        {
                            let mut updated = row;
                            updated.insert(remote_key.clone(), Value::Null);
                            self.engine
                                .update(&rel.target_table, updated.clone(), &mut self.changes)?;
                            if let Some(child) = loaded {
                                set_column(&child, &target, remote_key, Value::Null)?;
                                if let Some(tracked) = self.objects.get_mut(&child.object_id()) {
                                    tracked.original = Some(updated);
                                }
                            }
                        }
                    }
                }
                RelationshipKind::ManyToMany => {
                    let Some(link) = &rel.link_table else {
                        continue;
                    };
                    let link_model = self
                        .registry
                        .descriptor(&link.model)
                        .ok_or_else(|| Error::UnknownModel(link.model.clone()))?;
                    let referenced = referenced_column(&link_model, &link.local_column)?;
                    let value = column_value(instance, &descriptor, &referenced);
                    for row in self
                        .engine
                        .select_by(&link.table_name, &link.local_column, &value)
                    {
                        let key = identity_of(&link_model, &row).primary_key;
                        self.engine.delete(&link.table_name, &key, &mut self.changes)?;
                    }
                }
                RelationshipKind::ManyToOne => {}
            }
        }

        self.engine
            .delete(&table, &identity.primary_key, &mut self.changes)?;
        tracing::debug!(table = %table, key = ?identity.primary_key, "Deleted object");
        self.identity_map.remove(&ObjectKey::from_identity(&identity));
        self.objects.remove(&instance.object_id());
        if !self.was_deleted(instance.object_id()) {
            self.flushed_deleted.push((instance.clone(), identity));
        }
        Ok(())
    }

    /// Insert the link rows a many-to-many collection needs.
    ///
    /// Link rows are only removed when one of their ends is deleted.
    fn sync_links(&mut self, sync: &LinkSync) -> Result<()> {
        let Some(link) = &sync.rel.link_table else {
            return Ok(());
        };
        let link_model = self
            .registry
            .descriptor(&link.model)
            .ok_or_else(|| Error::UnknownModel(link.model.clone()))?;
        let target = self.target_of(&sync.rel)?;
        let local_ref = referenced_column(&link_model, &link.local_column)?;
        let remote_ref = referenced_column(&link_model, &link.remote_column)?;
        let local_value = column_value(&sync.local, &sync.local.model(), &local_ref);
        if local_value.is_null() {
            return Ok(());
        }

        let mut existing: Vec<Value> = self
            .engine
            .select_by(&link.table_name, &link.local_column, &local_value)
            .into_iter()
            .map(|row| row.get(&link.remote_column).cloned().unwrap_or_default())
            .collect();
        for remote in &sync.remotes {
            let remote_value = column_value(remote, &target, &remote_ref);
            if remote_value.is_null() || existing.contains(&remote_value) {
                continue;
            }
            let mut row = Row::new();
            for (field, column) in link_model.columns() {
                if let Some(default) = field.decl.default.produce() {
                    row.insert(column.name.clone(), codec::to_stored(column, default)?);
                }
            }
            row.insert(link.local_column.clone(), local_value.clone());
            row.insert(link.remote_column.clone(), remote_value.clone());
            self.engine
                .insert(&link.table_name, row, &mut self.changes)?;
            existing.push(remote_value);
        }
        Ok(())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Instance for a stored row, through the identity map.
    fn load(&mut self, descriptor: &Arc<ModelDescriptor>, row: Row) -> Result<Instance> {
        let identity = identity_of(descriptor, &row);
        if let Some(existing) = self.tracked_by_identity(&identity) {
            if self.state_of(&existing) == Some(ObjectState::Expired) {
                self.populate(&existing, descriptor, row)?;
                self.hydrate(&existing)?;
            }
            return Ok(existing);
        }

        let mut pairs = Vec::new();
        for (field, column) in descriptor.columns() {
            let stored = row.get(&column.name).cloned().unwrap_or_default();
            pairs.push((field.name.clone(), codec::from_stored(column, stored)?));
        }
        let registry = self.registry;
        let instance = registry.model(&descriptor.name)?.construct(pairs)?;
        instance.set_identity(Some(identity.clone()));
        tracing::trace!(model = %descriptor.name, key = ?identity.primary_key, "Loaded object");
        self.register(&instance, &identity, row);
        self.hydrate(&instance)?;
        Ok(instance)
    }

    fn load_all(
        &mut self,
        descriptor: &Arc<ModelDescriptor>,
        rows: Vec<Row>,
    ) -> Result<Vec<Instance>> {
        rows.into_iter().map(|row| self.load(descriptor, row)).collect()
    }

    /// Overwrite column-backed fields with stored values (validated).
    fn populate(
        &mut self,
        instance: &Instance,
        descriptor: &ModelDescriptor,
        row: Row,
    ) -> Result<()> {
        let registry = self.registry;
        let model = registry.model(&descriptor.name)?;
        for (field, column) in descriptor.columns() {
            let stored = row.get(&column.name).cloned().unwrap_or_default();
            model.assign(instance, &field.name, codec::from_stored(column, stored)?)?;
        }
        if let Some(tracked) = self.objects.get_mut(&instance.object_id()) {
            tracked.state = ObjectState::Persistent;
            tracked.original = Some(row);
        }
        Ok(())
    }

    /// Load every relationship of `instance`.
    fn hydrate(&mut self, instance: &Instance) -> Result<()> {
        let descriptor = instance.model();
        for (field, rel) in descriptor.relationships() {
            let value = self.load_related(instance, &descriptor, rel)?;
            instance.set_unchecked(&field.name, value)?;
        }
        Ok(())
    }

    fn load_related(
        &mut self,
        instance: &Instance,
        descriptor: &ModelDescriptor,
        rel: &RelationshipInfo,
    ) -> Result<Value> {
        let target = self.target_of(rel)?;
        let engine = self.engine;
        let related = match rel.kind {
            RelationshipKind::ManyToOne => {
                let Some(local_key) = &rel.local_key else {
                    return Ok(Value::Null);
                };
                let referenced = referenced_column(descriptor, local_key)?;
                let value = column_value(instance, descriptor, local_key);
                let rows = engine.select_by(&rel.target_table, &referenced, &value);
                self.load_all(&target, rows)?
            }
            RelationshipKind::OneToOne | RelationshipKind::OneToMany => {
                let Some(remote_key) = &rel.remote_key else {
                    return Ok(shape(&rel.collection, Vec::new()));
                };
                let referenced = referenced_column(&target, remote_key)?;
                let value = column_value(instance, descriptor, &referenced);
                let rows = engine.select_by(&rel.target_table, remote_key, &value);
                self.load_all(&target, rows)?
            }
            RelationshipKind::ManyToMany => {
                let Some(link) = &rel.link_table else {
                    return Ok(shape(&rel.collection, Vec::new()));
                };
                let link_model = self
                    .registry
                    .descriptor(&link.model)
                    .ok_or_else(|| Error::UnknownModel(link.model.clone()))?;
                let local_ref = referenced_column(&link_model, &link.local_column)?;
                let remote_ref = referenced_column(&link_model, &link.remote_column)?;
                let value = column_value(instance, descriptor, &local_ref);
                let mut rows = Vec::new();
                for link_row in engine.select_by(&link.table_name, &link.local_column, &value) {
                    let remote = link_row
                        .get(&link.remote_column)
                        .cloned()
                        .unwrap_or_default();
                    rows.extend(engine.select_by(&rel.target_table, &remote_ref, &remote));
                }
                self.load_all(&target, rows)?
            }
        };
        Ok(shape(&rel.collection, related))
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.debug_state())
            .finish()
    }
}

/// Debug information about session state.
#[derive(Debug, Clone)]
pub struct SessionDebugInfo {
    /// Total tracked objects.
    pub tracked: usize,
    /// Objects pending INSERT.
    pub pending_new: usize,
    /// Objects pending DELETE.
    pub pending_delete: usize,
    /// Engine changes in the current transaction.
    pub changes: usize,
    /// Whether in a transaction.
    pub in_transaction: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn table_name(descriptor: &ModelDescriptor) -> Result<&str> {
    descriptor
        .table_name
        .as_deref()
        .ok_or_else(|| Error::Custom(format!("{} is not a table model", descriptor.name)))
}

fn column_of<'d>(descriptor: &'d ModelDescriptor, column: &str) -> Option<&'d ColumnDescriptor> {
    descriptor
        .columns()
        .map(|(_, c)| c)
        .find(|c| c.name == column)
}

/// Column referenced by the foreign key column `fk_column` of `descriptor`.
fn referenced_column(descriptor: &ModelDescriptor, fk_column: &str) -> Result<String> {
    column_of(descriptor, fk_column)
        .and_then(|c| c.foreign_key.as_ref())
        .map(|fk| fk.column.clone())
        .ok_or_else(|| {
            Error::Storage(format!(
                "{}.{fk_column} is not a foreign key",
                descriptor.name
            ))
        })
}

fn column_value(instance: &Instance, descriptor: &ModelDescriptor, column: &str) -> Value {
    descriptor
        .field_for_column(column)
        .and_then(|f| instance.get(&f.name))
        .unwrap_or_default()
}

fn set_column(
    instance: &Instance,
    descriptor: &ModelDescriptor,
    column: &str,
    value: Value,
) -> Result<()> {
    let Some(field) = descriptor.field_for_column(column) else {
        return Ok(());
    };
    if instance.get(&field.name).as_ref() == Some(&value) {
        return Ok(());
    }
    instance.set_unchecked(&field.name, value)
}

fn identity_of(descriptor: &ModelDescriptor, row: &Row) -> IdentityKey {
    IdentityKey {
        table: descriptor.table_name.clone().unwrap_or_default(),
        primary_key: descriptor
            .columns()
            .filter(|(_, c)| c.primary_key)
            .map(|(_, c)| row.get(&c.name).cloned().unwrap_or_default())
            .collect(),
    }
}

fn encode(descriptor: &ModelDescriptor, instance: &Instance) -> Result<Row> {
    let mut row = Row::new();
    for (field, column) in descriptor.columns() {
        let value = instance.get(&field.name).unwrap_or_default();
        row.insert(column.name.clone(), codec::to_stored(column, value)?);
    }
    Ok(row)
}

fn flatten(value: &Value) -> Vec<Instance> {
    match value {
        Value::Model(instance) => vec![instance.clone()],
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        Value::Object(map) => map.values().flat_map(flatten).collect(),
        _ => Vec::new(),
    }
}

fn related_instances(instance: &Instance) -> Vec<Instance> {
    let descriptor = instance.model();
    descriptor
        .relationships()
        .flat_map(|(field, _)| flatten(&instance.get(&field.name).unwrap_or_default()))
        .collect()
}

/// Relationship value for loaded instances.
fn shape(collection: &CollectionKind, instances: Vec<Instance>) -> Value {
    match collection {
        CollectionKind::Scalar => instances
            .into_iter()
            .next()
            .map_or(Value::Null, Value::Model),
        CollectionKind::List => Value::Array(instances.into_iter().map(Value::Model).collect()),
        CollectionKind::Set => {
            let mut unique: Vec<Instance> = Vec::with_capacity(instances.len());
            for instance in instances {
                if !unique.iter().any(|u| u.is_same_object(&instance)) {
                    unique.push(instance);
                }
            }
            Value::Array(unique.into_iter().map(Value::Model).collect())
        }
        CollectionKind::Mapping { key } => Value::Object(
            instances
                .into_iter()
                .map(|i| {
                    let k = i.get(key).map(|v| mapping_key(&v)).unwrap_or_default();
                    (k, Value::Model(i))
                })
                .collect(),
        ),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dualmodel_core::{FieldDecl, ReferentialAction, RelationshipDecl, TypeRef};
    use dualmodel_schema::ModelSpec;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .define(
                ModelSpec::table("Team")
                    .field(
                        "id",
                        TypeRef::optional(TypeRef::Int),
                        FieldDecl::new().default(Value::Null).primary_key(true),
                    )
                    .field("name", TypeRef::Text, FieldDecl::new())
                    .relationship(
                        "heroes",
                        TypeRef::list(TypeRef::named("Hero")),
                        RelationshipDecl::new().back_populates("team"),
                    ),
            )
            .unwrap();
        registry
            .define(
                ModelSpec::table("Hero")
                    .field(
                        "id",
                        TypeRef::optional(TypeRef::Int),
                        FieldDecl::new().default(Value::Null).primary_key(true),
                    )
                    .field("name", TypeRef::Text, FieldDecl::new())
                    .field(
                        "team_id",
                        TypeRef::optional(TypeRef::Int),
                        FieldDecl::new()
                            .default(Value::Null)
                            .foreign_key("team.id")
                            .ondelete(ReferentialAction::SetNull),
                    )
                    .relationship(
                        "team",
                        TypeRef::optional(TypeRef::named("Team")),
                        RelationshipDecl::new().back_populates("heroes"),
                    ),
            )
            .unwrap();
        registry.configure().unwrap();
        registry
    }

    fn hero(registry: &Registry, name: &str) -> Instance {
        registry
            .model("Hero")
            .unwrap()
            .construct([("name", Value::from(name))])
            .unwrap()
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(!config.autoflush);
        assert!(config.expire_on_commit);
    }

    #[test]
    fn test_object_key_hash_consistency() {
        assert_eq!(hash_values(&[Value::BigInt(42)]), hash_values(&[Value::BigInt(42)]));
        assert_ne!(hash_values(&[Value::BigInt(42)]), hash_values(&[Value::BigInt(43)]));
        assert_ne!(
            hash_values(&[Value::BigInt(42)]),
            hash_values(&[Value::Text("42".to_string())])
        );
    }

    #[test]
    fn test_add_flush_assigns_identity() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();
        let mut session = Session::new(&engine, &registry);

        let rusty = hero(&registry, "Rusty-Man");
        session.add(&rusty).unwrap();
        assert_eq!(session.pending_new_count(), 1);
        assert_eq!(session.state_of(&rusty), Some(ObjectState::New));

        session.flush().unwrap();
        assert_eq!(rusty.get("id"), Some(Value::BigInt(1)));
        assert_eq!(session.state_of(&rusty), Some(ObjectState::Persistent));
        assert!(session.in_transaction());

        let again = session.get("Hero", 1).unwrap().unwrap();
        assert!(again.is_same_object(&rusty));
    }

    #[test]
    fn test_add_rejects_plain_models() {
        let mut registry = Registry::new();
        registry
            .define(ModelSpec::plain("Note").field("text", TypeRef::Text, FieldDecl::new()))
            .unwrap();
        registry.configure().unwrap();
        let engine = Engine::memory();
        let note = registry
            .model("Note")
            .unwrap()
            .construct([("text", "hi")])
            .unwrap();
        let mut session = Session::new(&engine, &registry);
        assert!(session.add(&note).is_err());
    }

    #[test]
    fn test_parents_flushed_first_and_hydrated() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();

        let team = registry
            .model("Team")
            .unwrap()
            .construct([("name", "Preventers")])
            .unwrap();
        let rusty = hero(&registry, "Rusty-Man");
        rusty.set_unchecked("team", Value::Model(team.clone())).unwrap();

        let mut session = Session::new(&engine, &registry);
        session.add(&rusty).unwrap();
        session.commit().unwrap();

        assert_eq!(team.get("id"), Some(Value::BigInt(1)));
        assert_eq!(rusty.get("team_id"), Some(Value::BigInt(1)));

        let mut other = Session::new(&engine, &registry);
        let loaded = other.get("Hero", 1).unwrap().unwrap();
        let Some(Value::Model(loaded_team)) = loaded.get("team") else {
            panic!("team not hydrated");
        };
        assert_eq!(loaded_team.get("name"), Some(Value::from("Preventers")));
        let Some(Value::Array(heroes)) = loaded_team.get("heroes") else {
            panic!("heroes not hydrated");
        };
        assert_eq!(heroes.len(), 1);
        assert!(heroes[0].as_instance().unwrap().is_same_object(&loaded));
        assert_eq!(loaded, rusty);
        assert!(!loaded.is_same_object(&rusty));
    }

    #[test]
    fn test_children_get_foreign_key_from_parent() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();

        let team = registry
            .model("Team")
            .unwrap()
            .construct([("name", "Z-Force")])
            .unwrap();
        let a = hero(&registry, "Dive Wilson");
        let b = hero(&registry, "Tommy Sharp");
        team.set_unchecked(
            "heroes",
            Value::Array(vec![Value::Model(a.clone()), Value::Model(b.clone())]),
        )
        .unwrap();

        let mut session = Session::new(&engine, &registry);
        session.add(&team).unwrap();
        session.commit().unwrap();

        assert_eq!(engine.row_count("hero"), 2);
        for row in engine.rows("hero") {
            assert_eq!(row["team_id"], Value::BigInt(1));
        }
        assert_eq!(b.get("team_id"), Some(Value::BigInt(1)));
    }

    #[test]
    fn test_update_only_dirty_rows() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();
        let mut session = Session::new(&engine, &registry);

        let rusty = hero(&registry, "Rusty-Man");
        session.add(&rusty).unwrap();
        session.commit().unwrap();

        session.flush().unwrap();
        assert_eq!(session.debug_state().changes, 0);

        registry
            .model("Hero")
            .unwrap()
            .assign(&rusty, "name", "Rusty")
            .unwrap();
        session.commit().unwrap();
        assert_eq!(engine.rows("hero")[0]["name"], Value::from("Rusty"));
    }

    #[test]
    fn test_delete_sets_children_null() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();

        let team = registry
            .model("Team")
            .unwrap()
            .construct([("name", "Preventers")])
            .unwrap();
        let rusty = hero(&registry, "Rusty-Man");
        rusty.set_unchecked("team", Value::Model(team.clone())).unwrap();

        let mut session = Session::new(&engine, &registry);
        session.add(&rusty).unwrap();
        session.commit().unwrap();

        session.delete(&team).unwrap();
        assert_eq!(session.pending_delete_count(), 1);
        session.commit().unwrap();

        assert_eq!(engine.row_count("team"), 0);
        assert_eq!(engine.rows("hero")[0]["team_id"], Value::Null);
        assert_eq!(rusty.get("team_id"), Some(Value::Null));
        assert!(!session.contains(&team));
    }

    #[test]
    fn test_rollback_reverts_flushed_changes() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();
        let mut session = Session::new(&engine, &registry);

        let rusty = hero(&registry, "Rusty-Man");
        session.add(&rusty).unwrap();
        session.flush().unwrap();
        assert_eq!(engine.row_count("hero"), 1);
        assert!(rusty.identity().is_some());

        session.rollback();
        assert_eq!(engine.row_count("hero"), 0);
        assert!(rusty.identity().is_none());
        assert!(!session.contains(&rusty));
        assert!(!session.in_transaction());
    }

    #[test]
    fn test_expired_objects_reload_on_get() {
        let registry = registry();
        let engine = Engine::memory();
        engine.create_all(&registry).unwrap();
        let mut session = Session::new(&engine, &registry);

        let rusty = hero(&registry, "Rusty-Man");
        session.add(&rusty).unwrap();
        session.commit().unwrap();
        assert_eq!(session.state_of(&rusty), Some(ObjectState::Expired));

        let mut other = Session::new(&engine, &registry);
        let copy = other.get("Hero", 1).unwrap().unwrap();
        registry
            .model("Hero")
            .unwrap()
            .assign(&copy, "name", "Renamed")
            .unwrap();
        other.commit().unwrap();

        let fetched = session.get("Hero", 1).unwrap().unwrap();
        assert!(fetched.is_same_object(&rusty));
        assert_eq!(rusty.get("name"), Some(Value::from("Renamed")));
        assert_eq!(session.state_of(&rusty), Some(ObjectState::Persistent));
    }

    #[test]
    fn test_delete_requires_persistent_instance() {
        let registry = registry();
        let engine = Engine::memory();
        let mut session = Session::new(&engine, &registry);
        let rusty = hero(&registry, "Rusty-Man");
        assert!(session.delete(&rusty).is_err());

        session.add(&rusty).unwrap();
        session.delete(&rusty).unwrap();
        assert_eq!(session.tracked_count(), 0);
        assert_eq!(session.pending_new_count(), 0);
    }

    #[test]
    fn test_shape_mapping_keys() {
        let registry = registry();
        let a = hero(&registry, "a");
        a.set_unchecked("id", Value::BigInt(7)).unwrap();
        let value = shape(
            &CollectionKind::Mapping { key: "id".into() },
            vec![a.clone()],
        );
        let Value::Object(map) = value else {
            panic!("expected mapping");
        };
        assert!(map["7"].as_instance().unwrap().is_same_object(&a));
    }
}
