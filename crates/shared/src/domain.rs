use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(ComponentId);
id_newtype!(OrderId);

/// Server-assigned order number used for sharing and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(pub u64);

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog category. The wire names are the ones the ordering API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "bun")]
    Base,
    #[serde(rename = "sauce")]
    Sauce,
    #[serde(rename = "main")]
    Filling,
}

impl Category {
    pub fn is_base(self) -> bool {
        self == Category::Base
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Base => "base",
            Category::Sauce => "sauce",
            Category::Filling => "filling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Nutrition {
    pub proteins: f64,
    pub fat: f64,
    pub carbohydrates: f64,
    pub calories: f64,
}

/// A catalog entry. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "_id")]
    pub id: ComponentId,
    #[serde(rename = "type")]
    pub category: Category,
    pub name: String,
    #[serde(flatten)]
    pub nutrition: Nutrition,
    pub price: u32,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub image_mobile: String,
    #[serde(default)]
    pub image_large: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Pending,
    Done,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: OrderId,
    #[serde(deserialize_with = "component_refs")]
    pub ingredients: Vec<ComponentId>,
    pub status: OrderStatus,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub number: OrderNumber,
}

/// The order-creation endpoint expands ingredients into full records while
/// the feeds send bare identifiers; both collapse to identifiers here.
fn component_refs<'de, D>(deserializer: D) -> Result<Vec<ComponentId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ComponentRef {
        Id(ComponentId),
        Record {
            #[serde(rename = "_id")]
            id: ComponentId,
        },
    }

    let refs = Vec::<ComponentRef>::deserialize(deserializer)?;
    Ok(refs
        .into_iter()
        .map(|r| match r {
            ComponentRef::Id(id) | ComponentRef::Record { id } => id,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
}
