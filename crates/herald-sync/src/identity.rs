//! # Identity & Attribution
//!
//! Subscriber key, tags and attributes.
//!
//! Every operation validates first and leaves state untouched on error. Only
//! an actual change marks the engine dirty and requests a sync; a write that
//! leaves state as it was is a no-op.

use tracing::debug;

use herald_core::validation::{
    validate_attribute_name, validate_attribute_value, validate_subscriber_key, validate_tag,
};
use herald_core::{AttributeMap, TagSet};

use crate::coordinator::{Effect, Persist, SyncCoordinator};
use crate::error::HeraldResult;

/// Store for the attribution half of the engine state.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    coordinator: SyncCoordinator,
}

impl IdentityStore {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        IdentityStore { coordinator }
    }

    // =========================================================================
    // Subscriber Key
    // =========================================================================

    /// Sets the subscriber key. Last write wins.
    pub async fn set_subscriber_key(&self, key: &str) -> HeraldResult<()> {
        validate_subscriber_key(key)?;
        let key = key.trim().to_string();

        self.coordinator
            .apply(move |state| {
                if state.identity.subscriber_key.as_deref() == Some(key.as_str()) {
                    return Ok(((), Effect::none()));
                }
                debug!(subscriber_key = %key, "Subscriber key set");
                state.identity.subscriber_key = Some(key);
                Ok(((), Effect::changed([Persist::SubscriberKey])))
            })
            .await
    }

    pub async fn subscriber_key(&self) -> Option<String> {
        self.coordinator
            .read(|state| state.identity.subscriber_key.clone())
            .await
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Adds a tag. Returns false if it was already present.
    pub async fn add_tag(&self, tag: &str) -> HeraldResult<bool> {
        validate_tag(tag)?;
        let tag = tag.trim().to_string();

        self.coordinator
            .apply(move |state| {
                if !state.tags.insert(tag) {
                    return Ok((false, Effect::none()));
                }
                Ok((true, Effect::changed([Persist::Tags])))
            })
            .await
    }

    /// Removes a tag, returning it if it was present.
    pub async fn remove_tag(&self, tag: &str) -> HeraldResult<Option<String>> {
        validate_tag(tag)?;
        let tag = tag.trim().to_string();

        self.coordinator
            .apply(move |state| match state.tags.take(&tag) {
                Some(removed) => Ok((Some(removed), Effect::changed([Persist::Tags]))),
                None => Ok((None, Effect::none())),
            })
            .await
    }

    pub async fn all_tags(&self) -> TagSet {
        self.coordinator.read(|state| state.tags.clone()).await
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Sets an attribute, overwriting any previous value.
    pub async fn add_attribute(&self, name: &str, value: &str) -> HeraldResult<()> {
        validate_attribute_name(name)?;
        validate_attribute_value(value)?;
        let name = name.trim().to_string();
        let value = value.to_string();

        self.coordinator
            .apply(move |state| {
                if state.attributes.get(&name) == Some(&value) {
                    return Ok(((), Effect::none()));
                }
                state.attributes.insert(name, value);
                Ok(((), Effect::changed([Persist::Attributes])))
            })
            .await
    }

    /// Removes an attribute, returning its previous value.
    pub async fn remove_attribute(&self, name: &str) -> HeraldResult<Option<String>> {
        validate_attribute_name(name)?;
        let name = name.trim().to_string();

        self.coordinator
            .apply(move |state| match state.attributes.remove(&name) {
                Some(previous) => Ok((Some(previous), Effect::changed([Persist::Attributes]))),
                None => Ok((None, Effect::none())),
            })
            .await
    }

    pub async fn all_attributes(&self) -> AttributeMap {
        self.coordinator
            .read(|state| state.attributes.clone())
            .await
    }
}
