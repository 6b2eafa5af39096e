//! The entity store.

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, IdStrategy};
use crate::entity::{
    AuditInfo, Entity, EntityChange, EntityKind, EntitySerDe, EntityType, FilesetType, FramedSerDe,
    NewEntity,
};
use crate::error::{StoreError, StoreResult};
use crate::gc::{GarbageCollector, GcHandle, GcStats};
use crate::id::{EntityId, IdGenerator, RandomIdGenerator, SequentialIdGenerator};
use crate::ident::{NameIdentifier, Namespace, StringIdentifier};
use crate::key::{
    children_prefix, decode_entity_prefix, decode_value, descendant_prefixes, encode_value,
    entity_prefix, id_index_key, split_version_key, version_key, VersionClock, VersionFlag,
    VersionStamp, ID_INDEX_PREFIX, ID_WATERMARK_KEY,
};
use crate::lock::{LockPath, TreeLockManager};
use lakemeta_storage::{BackendOptions, BackendRegistry, KvBackend, StorageError, WriteBatch};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Property of a schema or catalog holding the root directory that
/// managed filesets below it inherit.
pub const LOCATION_PROPERTY: &str = "location";

/// Attempts at drawing a generated id that is not yet indexed.
const ID_ATTEMPTS: usize = 8;

/// State recorded by one stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionState {
    /// The entity as of this version.
    Live(Box<Entity>),
    /// The entity was dropped.
    Tombstone,
    /// The entity moved to another name.
    Renamed {
        /// Identifier the entity moved to.
        to: NameIdentifier,
    },
}

/// One stored version of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// When the version was written.
    pub stamp: VersionStamp,
    /// What the version records.
    pub state: VersionState,
}

/// The newest version under one entity prefix.
struct StoredVersion {
    prefix: Vec<u8>,
    stamp: VersionStamp,
    flag: VersionFlag,
    payload: Vec<u8>,
}

impl StoredVersion {
    fn is_live(&self) -> bool {
        self.flag == VersionFlag::Live
    }
}

/// A namespace-hierarchical, versioned store of catalog entities.
///
/// Every mutation writes new versions instead of overwriting: an alter
/// appends the altered entity, a drop appends a tombstone, and a rename
/// appends the entity under its new name plus a marker under the old one.
/// Reads return the newest version. The [`GarbageCollector`] removes
/// versions that have been superseded for longer than the retention
/// window.
///
/// `EntityStore` is `Send + Sync`; share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use lakemeta_core::{Config, EntityStore, NameIdentifier, NewEntity, EntityType};
///
/// let store = EntityStore::open(Config::in_memory()).unwrap();
/// let m1 = NameIdentifier::parse("m1").unwrap();
/// store.create(&m1, NewEntity::metalake()).unwrap();
///
/// assert!(store.exists(&m1, EntityType::Metalake).unwrap());
/// store.close().unwrap();
/// ```
pub struct EntityStore {
    backend: Arc<dyn KvBackend>,
    serde: Arc<dyn EntitySerDe>,
    id_gen: Arc<dyn IdGenerator>,
    versions: VersionClock,
    locks: Arc<TreeLockManager>,
    config: Config,
    /// Highest id ever assigned. Held across the commit of every create.
    id_watermark: Mutex<u64>,
    gc: Mutex<Option<GcHandle>>,
    closed: AtomicBool,
}

impl fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("backend", &self.backend.name())
            .field("serde", &self.serde)
            .field("id_gen", &self.id_gen)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Opens a store with the built-in backends.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid configuration and
    /// `BackendUnavailable` if the backend cannot be opened.
    pub fn open(config: Config) -> StoreResult<Self> {
        Self::open_with_registry(config, &BackendRegistry::new())
    }

    /// Opens a store, resolving the backend name in `registry`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid configuration and
    /// `BackendUnavailable` if the backend is unknown or cannot be opened.
    pub fn open_with_registry(config: Config, registry: &BackendRegistry) -> StoreResult<Self> {
        config.validate()?;

        let options = BackendOptions {
            path: config.path.clone(),
            sync_on_commit: config.sync_on_commit,
            compact_threshold: None,
        };
        let backend = registry.create(&config.backend, &options)?;

        let id_gen = Self::id_generator(config.id_strategy, backend.as_ref())?;
        let serde = Arc::new(FramedSerDe::new(config.serde_format));

        info!(
            backend = %config.backend,
            format = %config.serde_format,
            "opening entity store"
        );
        Self::with_parts(backend, serde, id_gen, Arc::new(SystemClock), config)
    }

    /// Assembles a store from explicit parts.
    ///
    /// The backend settings of `config` are ignored; everything else
    /// applies, including the GC interval.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the retention window is shorter than
    /// the skew window, or `BackendUnavailable` if the id watermark cannot
    /// be read or the GC thread cannot be started.
    pub fn with_parts(
        backend: Arc<dyn KvBackend>,
        serde: Arc<dyn EntitySerDe>,
        id_gen: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> StoreResult<Self> {
        config.validate_windows()?;

        let watermark = highest_assigned_id(backend.as_ref())?;
        let store = Self {
            versions: VersionClock::new(clock, config.max_skew_time),
            locks: Arc::new(TreeLockManager::new(config.lock_timeout)),
            backend,
            serde,
            id_gen,
            id_watermark: Mutex::new(watermark),
            gc: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        };

        if let Some(interval) = store.config.gc_interval {
            let handle = GcHandle::spawn(store.garbage_collector(), interval)?;
            *store.gc.lock() = Some(handle);
        }
        Ok(store)
    }

    /// Builds the generator for `strategy`. A sequential generator resumes
    /// after the highest id `backend` has ever assigned.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the watermark cannot be read.
    pub fn id_generator(strategy: IdStrategy, backend: &dyn KvBackend) -> StoreResult<Arc<dyn IdGenerator>> {
        Ok(match strategy {
            IdStrategy::Random => Arc::new(RandomIdGenerator::new()),
            IdStrategy::Sequential => {
                Arc::new(SequentialIdGenerator::starting_after(highest_assigned_id(backend)?))
            }
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Loads the live entity `ident` of type `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` (`Schema m1.c1.s1 does not exist`) if no live
    /// entity has that identifier, and `InvalidArgument` if the identifier
    /// has the wrong depth for the type.
    pub fn load(&self, ident: &NameIdentifier, entity_type: EntityType) -> StoreResult<Entity> {
        self.ensure_open()?;
        check_depth(entity_type, ident)?;
        self.live_entity(entity_type, ident)?
            .map(|(_, entity)| entity)
            .ok_or_else(|| StoreError::not_found(entity_type, ident))
    }

    /// Returns true if a live entity has the identifier.
    ///
    /// # Errors
    ///
    /// Returns the non-`NotFound` errors of [`EntityStore::load`].
    pub fn exists(&self, ident: &NameIdentifier, entity_type: EntityType) -> StoreResult<bool> {
        match self.load(ident, entity_type) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Loads the live entity holding `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no live entity holds the id.
    pub fn load_by_id(&self, id: EntityId) -> StoreResult<Entity> {
        self.ensure_open()?;
        let missing = || StoreError::NotFound {
            message: format!("Entity with id {id} does not exist"),
        };

        let prefix = self.backend.get(&id_index_key(id))?.ok_or_else(missing)?;
        let (entity_type, ident) = decode_entity_prefix(&prefix)?;
        match self.live_entity(entity_type, &ident)? {
            Some((_, entity)) if entity.id == id => Ok(entity),
            _ => Err(missing()),
        }
    }

    /// Lists the live entities of `entity_type` directly inside `namespace`,
    /// sorted by name.
    ///
    /// The namespace itself is not checked; listing under a missing parent
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `entity_type` cannot live at the
    /// namespace's depth.
    pub fn list(&self, namespace: &Namespace, entity_type: EntityType) -> StoreResult<Vec<Entity>> {
        self.ensure_open()?;
        if namespace.len() != entity_type.depth() {
            return Err(StoreError::invalid_argument(format!(
                "{entity_type} entities live in namespaces of {} levels, got '{namespace}'",
                entity_type.depth()
            )));
        }

        self.latest_versions(&children_prefix(entity_type, namespace))?
            .into_iter()
            .filter(StoredVersion::is_live)
            .map(|v| self.serde.deserialize(&v.payload, entity_type))
            .collect()
    }

    /// Lists the identifiers of every live entity directly inside
    /// `namespace`, grouped by type and sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the scan fails.
    pub fn list_children(&self, namespace: &Namespace) -> StoreResult<Vec<(EntityType, NameIdentifier)>> {
        let mut out = Vec::new();
        for entity_type in EntityType::at_depth(namespace.len()) {
            for entity in self.list(namespace, entity_type)? {
                out.push((entity_type, entity.name));
            }
        }
        Ok(out)
    }

    /// Returns every retained version of an entity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an identifier of the wrong depth and
    /// `Serialization` if a stored version is corrupt.
    pub fn versions(&self, ident: &NameIdentifier, entity_type: EntityType) -> StoreResult<Vec<VersionInfo>> {
        self.ensure_open()?;
        check_depth(entity_type, ident)?;

        let rows = self.backend.scan_prefix(&entity_prefix(entity_type, ident))?;
        let mut out = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let (_, stamp) = split_version_key(&key)?;
            let (flag, payload) = decode_value(&value)?;
            let state = match flag {
                VersionFlag::Live => {
                    VersionState::Live(Box::new(self.serde.deserialize(payload, entity_type)?))
                }
                VersionFlag::Tombstone => VersionState::Tombstone,
                VersionFlag::Renamed => VersionState::Renamed {
                    to: decode_rename_target(payload)?,
                },
            };
            out.push(VersionInfo { stamp, state });
        }
        Ok(out)
    }

    /// Creates an entity.
    ///
    /// The parent must be live. If `new` carries a string identifier and a
    /// live entity with the same identifier and id already exists, that
    /// entity is returned unchanged, so a replayed create succeeds.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the parent does not exist
    /// - `AlreadyExists` if another live entity has the name
    /// - `InvalidArgument` for a bad identifier, a string identifier that
    ///   belongs to another live entity, or a fileset without a resolvable
    ///   storage location
    /// - `Conflict` on lock timeout or clock skew
    pub fn create(&self, ident: &NameIdentifier, new: NewEntity) -> StoreResult<Entity> {
        self.ensure_open()?;
        let entity_type = new.entity_type();
        check_depth(entity_type, ident)?;
        let requested = StringIdentifier::from_properties(&new.properties)?;

        let _guard = self.locks.lock(&[lock_path(ident)])?;

        let parent = match (ident.parent(), entity_type.parent_type()) {
            (Some(parent), Some(parent_type)) => Some(self.load(&parent, parent_type)?),
            _ => None,
        };

        let prefix = entity_prefix(entity_type, ident);
        let latest = self.latest_version(&prefix)?;
        if let Some(current) = latest.as_ref().filter(|v| v.is_live()) {
            let existing = self.serde.deserialize(&current.payload, entity_type)?;
            if requested.is_some() && existing.string_identifier() == requested {
                debug!(%ident, id = %existing.id, "create replayed");
                return Ok(existing);
            }
            return Err(StoreError::already_exists(entity_type, ident));
        }

        let mut kind = new.kind;
        if let EntityKind::Fileset {
            fileset_type,
            storage_location,
        } = &mut kind
        {
            if storage_location.as_deref().map_or(true, |l| l.trim().is_empty()) {
                let schema = parent.as_ref().ok_or_else(|| {
                    StoreError::invalid_argument(format!("Fileset {ident} has no schema"))
                })?;
                *storage_location = Some(self.resolve_fileset_location(ident, *fileset_type, schema)?);
            }
        }

        let mut watermark = self.id_watermark.lock();
        let id = match requested {
            Some(sid) => self.claim_requested_id(sid.id(), &prefix)?,
            None => self.generate_id()?,
        };

        let now = self.versions.clock().now_millis();
        let entity = Entity {
            id,
            name: ident.clone(),
            comment: new.comment,
            properties: StringIdentifier::from_id(id).new_properties_with_id(&new.properties),
            audit: AuditInfo::created(new.creator, now),
            kind,
        };
        let stamp = self.versions.next(latest.map(|v| v.stamp))?;

        let mut batch = WriteBatch::new();
        batch.put(
            version_key(&prefix, stamp),
            encode_value(VersionFlag::Live, &self.serde.serialize(&entity)?),
        );
        batch.put(id_index_key(id), prefix);
        if id.as_u64() > *watermark {
            batch.put(ID_WATERMARK_KEY.to_vec(), id.to_be_bytes().to_vec());
        }
        self.backend.write_batch(batch)?;
        *watermark = (*watermark).max(id.as_u64());

        debug!(%ident, %id, ?stamp, "created {entity_type}");
        Ok(entity)
    }

    /// Applies `changes` to an entity and persists the result as one new
    /// version.
    ///
    /// Every change is validated before anything is read or written; an
    /// invalid change leaves the store untouched. A rename moves the entity
    /// and all of its live descendants to the new name in the same atomic
    /// write. An empty change list returns the current entity.
    ///
    /// # Errors
    ///
    /// - `UnsupportedOperation` or `InvalidArgument` for an invalid change
    /// - `NotFound` if the entity does not exist
    /// - `AlreadyExists` if a rename target is taken
    /// - `Conflict` on lock timeout or clock skew
    pub fn alter(
        &self,
        ident: &NameIdentifier,
        entity_type: EntityType,
        modifier: &str,
        changes: &[EntityChange],
    ) -> StoreResult<Entity> {
        self.ensure_open()?;
        check_depth(entity_type, ident)?;
        for change in changes {
            change.validate(entity_type)?;
        }

        let mut target = ident.clone();
        for change in changes {
            if let EntityChange::Rename { new_name } = change {
                target = target.with_name(new_name.clone())?;
            }
        }

        let mut paths = vec![lock_path(ident)];
        if target != *ident {
            paths.push(lock_path(&target));
        }
        let _guard = self.locks.lock(&paths)?;

        let prefix = entity_prefix(entity_type, ident);
        let (current_stamp, current) = self
            .live_entity(entity_type, ident)?
            .ok_or_else(|| StoreError::not_found(entity_type, ident))?;
        if changes.is_empty() {
            return Ok(current);
        }

        let mut updated = current;
        for change in changes {
            change.apply(&mut updated)?;
        }
        updated
            .audit
            .touch(modifier, self.versions.clock().now_millis());

        let mut batch = WriteBatch::new();
        if target == *ident {
            let stamp = self.versions.next(Some(current_stamp))?;
            batch.put(
                version_key(&prefix, stamp),
                encode_value(VersionFlag::Live, &self.serde.serialize(&updated)?),
            );
            self.backend.write_batch(batch)?;
            debug!(%ident, ?stamp, "altered {entity_type}");
            return Ok(updated);
        }

        let target_prefix = entity_prefix(entity_type, &target);
        let target_latest = self.latest_version(&target_prefix)?;
        if target_latest.as_ref().is_some_and(StoredVersion::is_live) {
            return Err(StoreError::already_exists(entity_type, &target));
        }

        let mut moves = vec![Relocation {
            from: prefix,
            to: target_prefix,
            entity: updated.clone(),
        }];
        let mut floor = target_latest.map_or(current_stamp, |v| v.stamp.max(current_stamp));

        for (child_type, range) in descendant_prefixes(entity_type, ident) {
            for version in self.latest_versions(&range)?.into_iter().filter(StoredVersion::is_live) {
                let mut child = self.serde.deserialize(&version.payload, child_type)?;
                let moved = child.name.rebase(ident, &target).ok_or_else(|| {
                    StoreError::serialization(format!("{} is not below {ident}", child.name))
                })?;
                let to = entity_prefix(child_type, &moved);
                if let Some(existing) = self.latest_version(&to)? {
                    floor = floor.max(existing.stamp);
                }
                floor = floor.max(version.stamp);
                child.name = moved;
                moves.push(Relocation {
                    from: version.prefix,
                    to,
                    entity: child,
                });
            }
        }

        let stamp = self.versions.next(Some(floor))?;
        for relocation in &moves {
            relocation.write(&mut batch, self.serde.as_ref(), stamp)?;
        }
        self.backend.write_batch(batch)?;

        info!(from = %ident, to = %target, moved = moves.len(), "renamed {entity_type}");
        Ok(updated)
    }

    /// Drops an entity.
    ///
    /// Returns `false` if no live entity has the identifier. With `cascade`
    /// every live descendant is dropped in the same atomic write.
    ///
    /// # Errors
    ///
    /// Returns `NonEmpty` if the entity has live descendants and `cascade`
    /// is false, and `Conflict` on lock timeout or clock skew.
    pub fn drop(&self, ident: &NameIdentifier, entity_type: EntityType, cascade: bool) -> StoreResult<bool> {
        self.ensure_open()?;
        check_depth(entity_type, ident)?;

        let _guard = self.locks.lock(&[lock_path(ident)])?;

        let Some(current) = self
            .latest_version(&entity_prefix(entity_type, ident))?
            .filter(StoredVersion::is_live)
        else {
            return Ok(false);
        };

        let mut doomed = Vec::new();
        for (child_type, range) in descendant_prefixes(entity_type, ident) {
            for version in self.latest_versions(&range)?.into_iter().filter(StoredVersion::is_live) {
                doomed.push((child_type, version));
            }
        }
        if !doomed.is_empty() && !cascade {
            return Err(StoreError::non_empty(entity_type, ident));
        }
        doomed.push((entity_type, current));

        let floor = doomed.iter().map(|(_, v)| v.stamp).max();
        let stamp = self.versions.next(floor)?;

        let mut batch = WriteBatch::new();
        for (doomed_type, version) in &doomed {
            let entity = self.serde.deserialize(&version.payload, *doomed_type)?;
            batch.put(
                version_key(&version.prefix, stamp),
                encode_value(VersionFlag::Tombstone, &[]),
            );
            batch.delete(id_index_key(entity.id));
        }
        self.backend.write_batch(batch)?;

        info!(%ident, dropped = doomed.len(), "dropped {entity_type}");
        Ok(true)
    }

    /// Returns a collector over this store's backend.
    #[must_use]
    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(
            Arc::clone(&self.backend),
            Arc::clone(self.versions.clock()),
            self.config.retention(),
            Arc::clone(&self.locks),
        )
    }

    /// Runs one garbage-collection pass now.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the store is closed or the backend
    /// fails.
    pub fn collect_garbage(&self) -> StoreResult<GcStats> {
        self.ensure_open()?;
        self.garbage_collector().collect()
    }

    /// Stops the GC task and closes the backend. Later calls fail with
    /// `BackendUnavailable`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the final flush fails.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(gc) = self.gc.lock().take() {
            gc.stop();
        }
        self.backend.flush()?;
        self.backend.close()?;
        info!("entity store closed");
        Ok(())
    }

    /// Returns true once [`EntityStore::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::BackendUnavailable(StorageError::Closed));
        }
        Ok(())
    }

    fn latest_version(&self, prefix: &[u8]) -> StoreResult<Option<StoredVersion>> {
        let Some((key, value)) = self.backend.last_with_prefix(prefix)? else {
            return Ok(None);
        };
        let (entity, stamp) = split_version_key(&key)?;
        let (flag, payload) = decode_value(&value)?;
        Ok(Some(StoredVersion {
            prefix: entity.to_vec(),
            stamp,
            flag,
            payload: payload.to_vec(),
        }))
    }

    /// Newest version of every entity under `range`, in key order.
    fn latest_versions(&self, range: &[u8]) -> StoreResult<Vec<StoredVersion>> {
        let mut out: Vec<StoredVersion> = Vec::new();
        for (key, value) in self.backend.scan_prefix(range)? {
            let (entity, stamp) = split_version_key(&key)?;
            let (flag, payload) = decode_value(&value)?;
            let version = StoredVersion {
                prefix: entity.to_vec(),
                stamp,
                flag,
                payload: payload.to_vec(),
            };
            match out.last_mut() {
                Some(last) if last.prefix == version.prefix => *last = version,
                _ => out.push(version),
            }
        }
        Ok(out)
    }

    fn live_entity(
        &self,
        entity_type: EntityType,
        ident: &NameIdentifier,
    ) -> StoreResult<Option<(VersionStamp, Entity)>> {
        match self.latest_version(&entity_prefix(entity_type, ident))? {
            Some(v) if v.is_live() => {
                let entity = self.serde.deserialize(&v.payload, entity_type)?;
                Ok(Some((v.stamp, entity)))
            }
            _ => Ok(None),
        }
    }

    fn resolve_fileset_location(
        &self,
        ident: &NameIdentifier,
        fileset_type: FilesetType,
        schema: &Entity,
    ) -> StoreResult<String> {
        if fileset_type == FilesetType::External {
            return Err(StoreError::invalid_argument(format!(
                "Storage location must be set for external fileset {ident}"
            )));
        }

        if let Some(root) = location_property(schema) {
            return Ok(format!("{root}/{}", ident.name()));
        }
        if let Some(catalog_ident) = schema.name.parent() {
            if let Some((_, catalog)) = self.live_entity(EntityType::Catalog, &catalog_ident)? {
                if let Some(root) = location_property(&catalog) {
                    return Ok(format!("{root}/{}/{}", schema.name.name(), ident.name()));
                }
            }
        }
        Err(StoreError::invalid_argument(format!(
            "Storage location must be set for fileset: {ident}"
        )))
    }

    /// Checks that a caller-chosen id is free or already belongs to the
    /// entity at `prefix`.
    fn claim_requested_id(&self, id: EntityId, prefix: &[u8]) -> StoreResult<EntityId> {
        let Some(owner) = self.backend.get(&id_index_key(id))? else {
            return Ok(id);
        };
        if owner == prefix {
            return Ok(id);
        }
        let (owner_type, owner_ident) = decode_entity_prefix(&owner)?;
        if self.live_entity(owner_type, &owner_ident)?.is_some() {
            return Err(StoreError::invalid_argument(format!(
                "Id {id} is already assigned to {owner_type} {owner_ident}"
            )));
        }
        Ok(id)
    }

    fn generate_id(&self) -> StoreResult<EntityId> {
        for _ in 0..ID_ATTEMPTS {
            let id = self.id_gen.next_id()?;
            if self.backend.get(&id_index_key(id))?.is_none() {
                return Ok(id);
            }
        }
        Err(StoreError::id_generation(format!(
            "no unused id after {ID_ATTEMPTS} attempts"
        )))
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        if let Some(gc) = self.gc.get_mut().take() {
            gc.stop();
        }
    }
}

/// An entity moving from one prefix to another during a rename.
struct Relocation {
    from: Vec<u8>,
    to: Vec<u8>,
    entity: Entity,
}

impl Relocation {
    fn write(&self, batch: &mut WriteBatch, serde: &dyn EntitySerDe, stamp: VersionStamp) -> StoreResult<()> {
        batch.put(
            version_key(&self.to, stamp),
            encode_value(VersionFlag::Live, &serde.serialize(&self.entity)?),
        );
        batch.put(
            version_key(&self.from, stamp),
            encode_value(VersionFlag::Renamed, self.entity.name.to_string().as_bytes()),
        );
        batch.put(id_index_key(self.entity.id), self.to.clone());
        Ok(())
    }
}

fn check_depth(entity_type: EntityType, ident: &NameIdentifier) -> StoreResult<()> {
    if ident.namespace().len() != entity_type.depth() {
        return Err(StoreError::invalid_argument(format!(
            "{entity_type} identifier must have a namespace of {} levels, got '{ident}'",
            entity_type.depth()
        )));
    }
    Ok(())
}

fn lock_path(ident: &NameIdentifier) -> LockPath {
    ident.path().map(str::to_string).collect()
}

fn location_property(entity: &Entity) -> Option<&str> {
    entity
        .properties
        .get(LOCATION_PROPERTY)
        .map(|l| l.trim().trim_end_matches('/'))
        .filter(|l| !l.is_empty())
}

fn decode_rename_target(payload: &[u8]) -> StoreResult<NameIdentifier> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| StoreError::serialization("rename target is not UTF-8"))?;
    NameIdentifier::parse(text)
        .map_err(|e| StoreError::serialization(format!("invalid rename target: {e}")))
}

/// Highest id ever assigned: the persisted watermark or the largest
/// indexed id, whichever is greater.
fn highest_assigned_id(backend: &dyn KvBackend) -> StoreResult<u64> {
    let watermark = backend
        .get(&ID_WATERMARK_KEY)?
        .and_then(|bytes| EntityId::from_be_slice(&bytes))
        .map_or(0, EntityId::as_u64);
    let indexed = backend
        .last_with_prefix(&[ID_INDEX_PREFIX])?
        .and_then(|(key, _)| EntityId::from_be_slice(&key[1..]))
        .map_or(0, EntityId::as_u64);
    Ok(watermark.max(indexed))
}
