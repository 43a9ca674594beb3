#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use storekit_core::{Entity, ModelSource, PersistenceManager, StoreConfig, StoreDescriptor};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub name: String,
    pub rank: i64,
}

impl Entity for Widget {
    const ENTITY_NAME: &'static str = "Widget";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gadget {
    pub label: String,
}

impl Entity for Gadget {
    const ENTITY_NAME: &'static str = "Gadget";
}

/// Not part of any model used by these tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Orphan {
    pub note: String,
}

impl Entity for Orphan {
    const ENTITY_NAME: &'static str = "Orphan";
}

pub fn inventory_sources() -> Vec<ModelSource> {
    vec![
        ModelSource::new("inventory").with_entity::<Widget>(),
        ModelSource::new("extras").with_entity::<Gadget>(),
    ]
}

pub fn ephemeral_manager() -> PersistenceManager {
    PersistenceManager::initialize(
        inventory_sources(),
        StoreConfig::new("Inventory", StoreDescriptor::ephemeral()),
    )
    .unwrap()
}

pub fn widget(name: &str, rank: i64) -> impl FnOnce(Widget) -> Widget + '_ {
    move |mut widget| {
        widget.name = name.to_string();
        widget.rank = rank;
        widget
    }
}
