use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::auth::User;

use crate::error::SlotError;
use crate::models::{EntityType, ProviderRole, Slot};

/// How a provider account relates to other locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStructure {
    Standalone,
    /// Manages branches; must say which one a slot is for. An empty list means
    /// the branch list is not known and any location is accepted.
    ChainParent { branches: Vec<Uuid> },
    /// Operates at its own location only.
    Branch { parent: Option<Uuid> },
}

/// The authenticated caller acting as a slot provider.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: Uuid,
    pub role: ProviderRole,
    pub is_verified: bool,
    pub structure: AccountStructure,
}

impl Provider {
    pub fn from_user(user: &User) -> Result<Self, SlotError> {
        let id = Uuid::parse_str(&user.id)
            .map_err(|_| SlotError::Forbidden("Account id is not a valid provider id".to_string()))?;

        let role = user
            .role
            .as_deref()
            .ok_or_else(|| SlotError::Forbidden("Account has no role".to_string()))?
            .parse::<ProviderRole>()
            .map_err(|e| SlotError::Forbidden(format!("Role {}", e)))?;

        let structure = match (&role, &user.hospital_data) {
            (ProviderRole::Hospital, Some(data)) if data.parent_hospital_id.is_some() => {
                AccountStructure::Branch {
                    parent: data.parent_hospital_id.as_deref().and_then(parse_id),
                }
            }
            (ProviderRole::Hospital, Some(data)) if data.is_chain => AccountStructure::ChainParent {
                branches: data.branch_ids.iter().filter_map(|id| parse_id(id)).collect(),
            },
            _ => AccountStructure::Standalone,
        };

        debug!("Resolved provider {} as {} ({:?})", id, role, structure);
        Ok(Self {
            id,
            role,
            is_verified: user.is_verified,
            structure,
        })
    }

    /// Verification and role eligibility for offering `entity_type`.
    pub fn ensure_can_offer(&self, entity_type: EntityType) -> Result<(), SlotError> {
        self.ensure_verified()?;
        if !self.role.can_offer(entity_type) {
            return Err(SlotError::Forbidden(format!(
                "A {} cannot offer {} slots",
                self.role, entity_type
            )));
        }
        Ok(())
    }

    pub fn ensure_verified(&self) -> Result<(), SlotError> {
        if self.is_verified {
            Ok(())
        } else {
            Err(SlotError::Forbidden(
                "Provider account must be verified before publishing slots".to_string(),
            ))
        }
    }

    /// The location a new slot is filed under.
    pub fn resolve_location(&self, requested: Option<Uuid>) -> Result<Option<Uuid>, SlotError> {
        match &self.structure {
            AccountStructure::Branch { .. } => Ok(Some(self.id)),
            AccountStructure::ChainParent { branches } => {
                let location = requested.ok_or_else(|| {
                    SlotError::invalid("location_id", "is required for hospital chains")
                })?;
                if !branches.is_empty() && !branches.contains(&location) {
                    return Err(SlotError::Forbidden(format!(
                        "Location {} is not one of this chain's branches",
                        location
                    )));
                }
                Ok(Some(location))
            }
            AccountStructure::Standalone => Ok(None),
        }
    }

    pub fn ensure_owner(&self, slot: &Slot) -> Result<(), SlotError> {
        if slot.provider_id == self.id {
            Ok(())
        } else {
            Err(SlotError::Ownership(slot.id))
        }
    }
}

fn parse_id(raw: &str) -> Option<Uuid> {
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Ignoring malformed hospital id '{}' in token claims", raw);
            None
        }
    }
}
