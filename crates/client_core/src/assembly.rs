//! Ordered construction of a single burger: at most one base plus an
//! ordered stack of fillings.
//!
//! Every operation returns a new [`AssemblyState`]. Operations that leave
//! the assembly unchanged hand back a clone that shares the same `items`
//! allocation, so callers can detect a no-op with [`Arc::ptr_eq`].

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::domain::{Component, ComponentId};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ValidationError;

/// Per-insertion key that tells apart repeated uses of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyItem {
    pub instance: InstanceId,
    pub component: Component,
}

impl AssemblyItem {
    pub fn new(component: Component) -> Self {
        Self {
            instance: InstanceId::new(),
            component,
        }
    }

    pub fn component_id(&self) -> &ComponentId {
        &self.component.id
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyState {
    pub base: Option<Component>,
    pub items: Arc<Vec<AssemblyItem>>,
}

impl AssemblyState {
    /// Replaces the base unconditionally. Non-base components are refused.
    pub fn set_base(&self, component: Component) -> Result<Self, ValidationError> {
        if !component.category.is_base() {
            return Err(ValidationError::InvalidCategory {
                component: component.id,
                expected: "base",
                found: component.category,
            });
        }
        Ok(Self {
            base: Some(component),
            items: Arc::clone(&self.items),
        })
    }

    /// Appends `component` under a freshly minted instance identifier.
    pub fn add_item(&self, component: Component) -> Result<Self, ValidationError> {
        self.insert(AssemblyItem::new(component))
    }

    /// Appends an already-minted item. An item whose instance identifier is
    /// already present is ignored so identifiers stay unique.
    pub fn insert(&self, item: AssemblyItem) -> Result<Self, ValidationError> {
        if item.component.category.is_base() {
            return Err(ValidationError::InvalidCategory {
                component: item.component.id,
                expected: "sauce or filling",
                found: item.component.category,
            });
        }
        if self.position(item.instance).is_some() {
            debug!(instance = %item.instance, "assembly: instance already present");
            return Ok(self.clone());
        }

        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.extend(self.items.iter().cloned());
        items.push(item);
        Ok(Self {
            base: self.base.clone(),
            items: Arc::new(items),
        })
    }

    pub fn remove_item(&self, instance: InstanceId) -> Self {
        let Some(index) = self.position(instance) else {
            return self.clone();
        };
        let mut items = self.items.as_ref().clone();
        items.remove(index);
        Self {
            base: self.base.clone(),
            items: Arc::new(items),
        }
    }

    /// Moves the item at `from` to `to`, shifting the items in between.
    /// Out-of-range indices (negative included) and `from == to` leave the
    /// state untouched.
    pub fn move_item(&self, from: isize, to: isize) -> Self {
        let len = self.items.len();
        let (Ok(from), Ok(to)) = (usize::try_from(from), usize::try_from(to)) else {
            return self.clone();
        };
        if from == to || from >= len || to >= len {
            return self.clone();
        }

        let mut items = self.items.as_ref().clone();
        let item = items.remove(from);
        items.insert(to, item);
        Self {
            base: self.base.clone(),
            items: Arc::new(items),
        }
    }

    pub fn clear(&self) -> Self {
        Self::default()
    }

    /// Total price. The base is counted twice, once for each half.
    pub fn price(&self) -> u64 {
        let base = self
            .base
            .as_ref()
            .map_or(0, |base| 2 * u64::from(base.price));
        base + self
            .items
            .iter()
            .map(|item| u64::from(item.component.price))
            .sum::<u64>()
    }

    /// Bill of materials with the base bookending the fillings, or `None`
    /// while no base is set.
    pub fn materials(&self) -> Option<Vec<ComponentId>> {
        let base = self.base.as_ref()?;
        let mut materials = Vec::with_capacity(self.items.len() + 2);
        materials.push(base.id.clone());
        materials.extend(self.items.iter().map(|item| item.component.id.clone()));
        materials.push(base.id.clone());
        Some(materials)
    }

    /// How many times `id` appears in the assembly; a base counts twice.
    pub fn count_of(&self, id: &ComponentId) -> usize {
        if self.base.as_ref().is_some_and(|base| &base.id == id) {
            return 2;
        }
        self.items
            .iter()
            .filter(|item| item.component_id() == id)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.items.is_empty()
    }

    fn position(&self, instance: InstanceId) -> Option<usize> {
        self.items.iter().position(|item| item.instance == instance)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AssemblyCommand {
    SetBase(Component),
    AddItem(AssemblyItem),
    RemoveItem(InstanceId),
    MoveItem { from: isize, to: isize },
    Clear,
    #[serde(other)]
    Unrecognized,
}

impl AssemblyCommand {
    /// Mints the instance identifier up front so replaying the command
    /// yields the same assembly.
    pub fn add_item(component: Component) -> Self {
        AssemblyCommand::AddItem(AssemblyItem::new(component))
    }
}

pub fn reduce(state: &AssemblyState, command: AssemblyCommand) -> AssemblyState {
    let next = match command {
        AssemblyCommand::SetBase(component) => state.set_base(component),
        AssemblyCommand::AddItem(item) => state.insert(item),
        AssemblyCommand::RemoveItem(instance) => Ok(state.remove_item(instance)),
        AssemblyCommand::MoveItem { from, to } => Ok(state.move_item(from, to)),
        AssemblyCommand::Clear => Ok(state.clear()),
        AssemblyCommand::Unrecognized => Ok(state.clone()),
    };
    next.unwrap_or_else(|err| {
        warn!(error = %err, "assembly: command refused");
        state.clone()
    })
}
