//! Identifier resolution
//!
//! Turns a [`ResourceRef`] into a fully populated [`Iid`] by asking the
//! provider. A system id is authoritative and fetched directly. A name is
//! matched against a scoped listing, and several matches are only accepted
//! when a tie-break is configured.

use crate::error::{CloudError, Result};
use crate::identity::{Iid, ResourceKind, ResourceRef, Scope};
use async_trait::async_trait;

/// How a provider compares resource names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMatching {
    #[default]
    Exact,
    CaseInsensitive,
}

impl NameMatching {
    pub fn matches(&self, candidate: &str, wanted: &str) -> bool {
        match self {
            NameMatching::Exact => candidate == wanted,
            NameMatching::CaseInsensitive => candidate.eq_ignore_ascii_case(wanted),
        }
    }
}

/// Read-only view of one provider resource type
#[async_trait]
pub trait Lookup: Send + Sync {
    type Resource: Send + Sync;

    fn kind(&self) -> ResourceKind;

    /// Direct fetch. `Ok(None)` means the provider has no such id.
    async fn fetch_by_id(&self, scope: &Scope, id: &str) -> Result<Option<Self::Resource>>;

    /// Every resource visible in `scope`.
    async fn list(&self, scope: &Scope) -> Result<Vec<Self::Resource>>;

    fn iid_of(&self, resource: &Self::Resource) -> Iid;

    /// Zone the resource lives in, when the provider reports one.
    fn zone_of(&self, _resource: &Self::Resource) -> Option<String> {
        None
    }

    fn name_matching(&self) -> NameMatching {
        NameMatching::Exact
    }
}

/// A resolved identifier with the provider object it came from
#[derive(Debug, Clone)]
pub struct Resolved<R> {
    pub iid: Iid,
    pub resource: R,
}

/// Resolver with an optional zone tie-break.
///
/// Without a tie-break, a name that matches more than one resource in scope
/// yields [`CloudError::Ambiguous`].
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    preferred_zone: Option<String>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Break ties in favour of the candidate living in `zone`.
    pub fn prefer_zone(mut self, zone: impl Into<String>) -> Self {
        self.preferred_zone = Some(zone.into());
        self
    }

    pub async fn resolve<L: Lookup + ?Sized>(
        &self,
        lookup: &L,
        scope: &Scope,
        reference: &ResourceRef,
    ) -> Result<Resolved<L::Resource>> {
        let kind = lookup.kind();
        reference.require(kind)?;

        if let Some(id) = reference.system_id() {
            tracing::debug!(kind = %kind, id, "resolving by system id");
            return match lookup.fetch_by_id(scope, id).await? {
                Some(resource) => Ok(Resolved {
                    iid: lookup.iid_of(&resource),
                    resource,
                }),
                None => Err(CloudError::not_found(kind, id)),
            };
        }

        let name = reference.name().unwrap_or_default();
        tracing::debug!(kind = %kind, name, scope = %scope.label(), "resolving by name");

        let matching = lookup.name_matching();
        let mut candidates: Vec<L::Resource> = lookup
            .list(scope)
            .await?
            .into_iter()
            .filter(|r| matching.matches(&lookup.iid_of(r).name_id, name))
            .collect();

        if let Some(zone) = &scope.zone {
            candidates.retain(|r| match lookup.zone_of(r) {
                Some(z) => &z == zone,
                None => true,
            });
        }

        if candidates.len() > 1
            && let Some(preferred) = &self.preferred_zone
        {
            let in_preferred: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, r)| lookup.zone_of(r).as_deref() == Some(preferred.as_str()))
                .map(|(i, _)| i)
                .collect();
            if let [only] = in_preferred.as_slice() {
                let chosen = candidates.swap_remove(*only);
                candidates = vec![chosen];
            }
        }

        match candidates.len() {
            0 => Err(CloudError::not_found(kind, name)),
            1 => {
                let resource = candidates.remove(0);
                Ok(Resolved {
                    iid: lookup.iid_of(&resource),
                    resource,
                })
            }
            _ => Err(CloudError::Ambiguous {
                kind,
                reference: name.to_string(),
                candidates: candidates.iter().map(|r| lookup.iid_of(r)).collect(),
            }),
        }
    }

    pub async fn resolve_iid<L: Lookup + ?Sized>(
        &self,
        lookup: &L,
        scope: &Scope,
        reference: &ResourceRef,
    ) -> Result<Iid> {
        Ok(self.resolve(lookup, scope, reference).await?.iid)
    }

    /// Resolves each reference in order. The first failure fails the batch.
    pub async fn resolve_all<L: Lookup + ?Sized>(
        &self,
        lookup: &L,
        scope: &Scope,
        references: &[ResourceRef],
    ) -> Result<Vec<Iid>> {
        let mut out = Vec::with_capacity(references.len());
        for reference in references {
            out.push(self.resolve_iid(lookup, scope, reference).await?);
        }
        Ok(out)
    }
}

/// Fails with `AlreadyExists` when `name` resolves to something in scope.
///
/// Best-effort: two concurrent creates with the same name can both pass.
pub async fn ensure_absent<L: Lookup + ?Sized>(
    lookup: &L,
    scope: &Scope,
    name: &str,
) -> Result<()> {
    let matching = lookup.name_matching();
    let exists = lookup
        .list(scope)
        .await?
        .iter()
        .filter(|r| matching.matches(&lookup.iid_of(r).name_id, name))
        .any(|r| match (&scope.zone, lookup.zone_of(r)) {
            (Some(zone), Some(z)) => &z == zone,
            _ => true,
        });
    if exists {
        return Err(CloudError::already_exists(lookup.kind(), name));
    }
    Ok(())
}
