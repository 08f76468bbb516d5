use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(LeadId);

/// Sellers are users with the `Seller` role; the alias keeps call sites honest
/// about which side of the assignment an id sits on.
pub type SellerId = UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Seller,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Seller => "seller",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "seller" | "vendedor" => Ok(Role::Seller),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Uncontacted,
    Contacted,
    Interested,
    Meeting,
    Won,
    Lost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 6] = [
        LeadStatus::Uncontacted,
        LeadStatus::Contacted,
        LeadStatus::Interested,
        LeadStatus::Meeting,
        LeadStatus::Won,
        LeadStatus::Lost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Uncontacted => "uncontacted",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Interested => "interested",
            LeadStatus::Meeting => "meeting",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
        }
    }

    /// Any status past first touch counts towards a seller's contacted total.
    pub fn is_contacted(self) -> bool {
        !matches!(self, LeadStatus::Uncontacted)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uncontacted" | "new" | "sin_contactar" => Ok(LeadStatus::Uncontacted),
            "contacted" | "contactado" => Ok(LeadStatus::Contacted),
            "interested" | "interesado" => Ok(LeadStatus::Interested),
            "meeting" | "reunion" => Ok(LeadStatus::Meeting),
            "won" | "ganado" => Ok(LeadStatus::Won),
            "lost" | "perdido" => Ok(LeadStatus::Lost),
            other => Err(UnknownVariant::new("lead status", other)),
        }
    }
}

/// Closed set of distribution policies. Wire tags follow the operator UI
/// (`equitativo` for the equal split); parsing also accepts English aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "equitativo")]
    Equal,
    #[serde(rename = "regional")]
    Regional,
    #[serde(rename = "performance")]
    Performance,
    #[serde(rename = "manual")]
    Manual,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Equal => "equitativo",
            StrategyKind::Regional => "regional",
            StrategyKind::Performance => "performance",
            StrategyKind::Manual => "manual",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equitativo" | "equal" | "equal_split" => Ok(StrategyKind::Equal),
            "regional" | "region" => Ok(StrategyKind::Regional),
            "performance" | "rendimiento" => Ok(StrategyKind::Performance),
            "manual" => Ok(StrategyKind::Manual),
            other => Err(UnknownVariant::new("strategy", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(rename = "_id")]
    pub id: LeadId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub status: LeadStatus,
    #[serde(default)]
    pub assigned_to: Option<SellerId>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub last_contact: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_action: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn is_unassigned(&self) -> bool {
        self.assigned_to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    #[serde(rename = "_id")]
    pub id: SellerId,
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub total_leads: u64,
    pub total_contacted: u64,
    #[serde(default)]
    pub total_converted: u64,
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
