//! Feature Catalog
//!
//! Per-session mirror of the device feature table. Each feature identifier
//! maps to one entry holding both its current value and its descriptor, so
//! values and descriptors can never be out of step: every rebuild swaps the
//! whole map at once.
//!
//! No lock is held across an SDK call. The SDK may deliver events (and so
//! re-enter [`FeatureCatalog::refresh`]) from inside any call. Values a
//! device event reported while a bulk re-read was in flight win over the
//! (older) bulk values.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kscam_core::{CameraError, CameraResult};

use crate::sdk::{
    CameraHandle, FeatureDesc, FeatureId, FeatureValue, Format, KsCamSdk, SdkResultExt, Variant,
};

/// Value and descriptor of one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Current value
    pub value: Variant,
    /// Legal value space for `value`
    pub descriptor: FeatureDesc,
}

/// Feature table of one open device.
pub struct FeatureCatalog {
    sdk: Arc<dyn KsCamSdk>,
    handle: CameraHandle,
    entries: RwLock<BTreeMap<FeatureId, CatalogEntry>>,
    /// Bumped by every device-originated refresh.
    revision: AtomicU64,
    /// Revision at which each feature was last refreshed by an event.
    refreshed: Mutex<BTreeMap<FeatureId, u64>>,
}

impl std::fmt::Debug for FeatureCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureCatalog")
            .field("handle", &self.handle)
            .field("features", &self.entries.read().len())
            .finish()
    }
}

impl FeatureCatalog {
    /// Empty catalog for `handle`. Call [`build`](Self::build) before use.
    pub fn new(sdk: Arc<dyn KsCamSdk>, handle: CameraHandle) -> Self {
        Self {
            sdk,
            handle,
            entries: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            refreshed: Mutex::new(BTreeMap::new()),
        }
    }

    /// Session this catalog mirrors.
    pub fn handle(&self) -> CameraHandle {
        self.handle
    }

    /// Fetch every value and every descriptor, then install both at once.
    ///
    /// Any failure leaves the catalog untouched.
    pub fn build(&self) -> CameraResult<()> {
        let values = self.query_values()?;
        let entries = self.query_descriptors(values)?;
        tracing::debug!(handle = self.handle, features = entries.len(), "feature catalog built");
        *self.entries.write() = entries;
        Ok(())
    }

    /// Bulk-query every feature value.
    ///
    /// Known features keep their descriptors; features seen for the first
    /// time get theirs fetched before the new map is installed. A value whose
    /// discriminant differs from the one already catalogued is rejected and
    /// the old value kept. A value refreshed by a device event after the
    /// bulk query started is kept as well.
    pub fn fetch_all(&self) -> CameraResult<()> {
        let since = self.revision.load(Ordering::Acquire);
        let values = self.query_values()?;

        let known: BTreeMap<FeatureId, CatalogEntry> = self.entries.read().clone();
        let mut next = BTreeMap::new();
        for fv in values {
            let entry = match known.get(&fv.id) {
                Some(existing) => {
                    if existing.value.kind() != fv.variant.kind() {
                        tracing::warn!(
                            feature = %fv.id,
                            expected = ?existing.value.kind(),
                            got = ?fv.variant.kind(),
                            "device changed a feature's value kind; keeping previous value"
                        );
                        existing.clone()
                    } else {
                        CatalogEntry {
                            value: fv.variant,
                            descriptor: existing.descriptor.clone(),
                        }
                    }
                }
                None => CatalogEntry {
                    descriptor: self.query_descriptor(fv.id)?,
                    value: fv.variant,
                },
            };
            next.insert(fv.id, entry);
        }

        let mut entries = self.entries.write();
        self.keep_newer_values(&entries, &mut next, since);
        *entries = next;
        Ok(())
    }

    fn keep_newer_values(
        &self,
        current: &BTreeMap<FeatureId, CatalogEntry>,
        next: &mut BTreeMap<FeatureId, CatalogEntry>,
        since: u64,
    ) {
        let refreshed = self.refreshed.lock();
        for (id, entry) in next.iter_mut() {
            let newer = refreshed.get(id).is_some_and(|rev| *rev > since);
            if let (true, Some(live)) = (newer, current.get(id)) {
                tracing::debug!(feature = %id, "keeping event value over bulk re-read");
                entry.value = live.value.clone();
            }
        }
    }

    /// Re-fetch the descriptor of every catalogued feature.
    ///
    /// Any single failure aborts the refresh and keeps the previous map.
    /// Only descriptors are replaced; values stay as they are now.
    pub fn fetch_descriptors(&self) -> CameraResult<()> {
        let ids = self.ids();
        let mut descriptors = Vec::with_capacity(ids.len());
        for id in ids {
            descriptors.push((id, self.query_descriptor(id)?));
        }
        let mut entries = self.entries.write();
        for (id, descriptor) in descriptors {
            if let Some(entry) = entries.get_mut(&id) {
                entry.descriptor = descriptor;
            }
        }
        Ok(())
    }

    /// Push the catalogued value of `id` to the device.
    ///
    /// On failure the whole value table is re-read from the device before the
    /// error is returned, so no optimistic write survives a rejected commit.
    pub fn commit(&self, id: FeatureId) -> CameraResult<()> {
        let value = FeatureValue::new(id, self.value(id)?);
        match self.sdk.set_features(self.handle, std::slice::from_ref(&value)) {
            Ok(()) => {
                tracing::debug!(feature = %id, value = ?value.variant, "feature committed");
                Ok(())
            }
            Err(code) => {
                tracing::warn!(feature = %id, %code, "feature commit failed; resynchronizing");
                if let Err(e) = self.fetch_all() {
                    tracing::error!(kind = %e.kind(), error = %e, "resynchronization after failed commit failed");
                }
                Err(code.into_error("SetFeatures"))
            }
        }
    }

    /// Update the value of `id` in place, then commit it.
    ///
    /// `update` may only change the payload; a changed discriminant is
    /// rejected before anything is stored.
    pub fn update<F>(&self, id: FeatureId, update: F) -> CameraResult<()>
    where
        F: FnOnce(&mut Variant) -> CameraResult<()>,
    {
        {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(&id)
                .ok_or(CameraError::UnknownFeature(id.raw()))?;
            let mut next = entry.value.clone();
            update(&mut next)?;
            if next.kind() != entry.value.kind() {
                return Err(CameraError::InvalidValue {
                    name: id.name().to_string(),
                    value: format!("{:?}", next),
                });
            }
            entry.value = next;
        }
        self.commit(id)
    }

    /// Overwrite one value from a device notification and re-fetch its
    /// descriptor (some bounds depend on the value).
    pub fn refresh(&self, id: FeatureId, variant: Variant) -> CameraResult<()> {
        {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(&id)
                .ok_or(CameraError::UnknownFeature(id.raw()))?;
            if entry.value.kind() != variant.kind() {
                return Err(CameraError::InvalidValue {
                    name: id.name().to_string(),
                    value: format!("{:?}", variant),
                });
            }
            entry.value = variant;
            let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
            self.refreshed.lock().insert(id, revision);
        }
        self.refresh_descriptor(id)?;
        Ok(())
    }

    /// Re-fetch a single descriptor.
    pub fn refresh_descriptor(&self, id: FeatureId) -> CameraResult<FeatureDesc> {
        let descriptor = self.query_descriptor(id)?;
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or(CameraError::UnknownFeature(id.raw()))?;
        entry.descriptor = descriptor.clone();
        Ok(descriptor)
    }

    // ---- queries ------------------------------------------------------------

    /// Whether the device reported `id`.
    pub fn contains(&self, id: FeatureId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Number of catalogued features.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True before [`build`](Self::build) succeeds.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Catalogued identifiers in ascending order.
    pub fn ids(&self) -> Vec<FeatureId> {
        self.entries.read().keys().copied().collect()
    }

    /// Copy of the entry for `id`.
    pub fn entry(&self, id: FeatureId) -> CameraResult<CatalogEntry> {
        self.entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(CameraError::UnknownFeature(id.raw()))
    }

    /// Current value of `id`.
    pub fn value(&self, id: FeatureId) -> CameraResult<Variant> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.value.clone())
            .ok_or(CameraError::UnknownFeature(id.raw()))
    }

    /// Descriptor of `id`.
    pub fn descriptor(&self, id: FeatureId) -> CameraResult<FeatureDesc> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.descriptor.clone())
            .ok_or(CameraError::UnknownFeature(id.raw()))
    }

    /// Scalar unsigned value of `id`.
    pub fn u32_value(&self, id: FeatureId) -> CameraResult<u32> {
        match self.value(id)? {
            Variant::UInt32(v) => Ok(v),
            other => Err(CameraError::InvalidValue {
                name: id.name().to_string(),
                value: format!("{:?}", other),
            }),
        }
    }

    /// Current exposure time in microseconds.
    pub fn exposure_us(&self) -> CameraResult<u32> {
        self.u32_value(FeatureId::ExposureTime)
    }

    /// Active image format.
    pub fn format(&self) -> CameraResult<Format> {
        match self.value(FeatureId::Format)? {
            Variant::Format(format) => Ok(format),
            other => Err(CameraError::InvalidValue {
                name: FeatureId::Format.name().to_string(),
                value: format!("{:?}", other),
            }),
        }
    }

    /// Comment of the element-list entry currently selected for `id`.
    pub fn selected_comment(&self, id: FeatureId) -> CameraResult<Option<String>> {
        let entry = self.entry(id)?;
        Ok(match (&entry.descriptor, &entry.value) {
            (FeatureDesc::ElementList(list), Variant::UInt32(v)) => {
                list.iter().find(|e| e.value == *v).map(|e| e.comment.clone())
            }
            (FeatureDesc::FormatList(list), Variant::Format(f)) => {
                list.iter().find(|e| e.format == *f).map(|e| e.comment.clone())
            }
            _ => None,
        })
    }

    // ---- SDK access ---------------------------------------------------------

    fn query_values(&self) -> CameraResult<Vec<FeatureValue>> {
        let values = self.sdk.get_all_features(self.handle).op("GetAllFeatures")?;
        if values.is_empty() {
            tracing::error!(handle = self.handle, "device returned no features");
            return Err(CameraError::device("GetAllFeatures", 0, "no features returned"));
        }
        Ok(values)
    }

    fn query_descriptor(&self, id: FeatureId) -> CameraResult<FeatureDesc> {
        self.sdk
            .get_feature_desc(self.handle, id)
            .map_err(|code| {
                tracing::error!(feature = %id, %code, "descriptor query failed");
                code.into_error("GetFeatureDesc")
            })
    }

    fn query_descriptors(
        &self,
        values: Vec<FeatureValue>,
    ) -> CameraResult<BTreeMap<FeatureId, CatalogEntry>> {
        values
            .into_iter()
            .map(|fv| {
                let descriptor = self.query_descriptor(fv.id)?;
                Ok((
                    fv.id,
                    CatalogEntry {
                        value: fv.variant,
                        descriptor,
                    },
                ))
            })
            .collect()
    }
}
