//! # Component Types
//!
//! Components are plain, fixed-layout values attached to entities.
//!
//! Each component type carries an explicit numeric [`ComponentId`]. Storage
//! lookup and group identity are derived from that id alone, so two worlds
//! (or two processes) built from the same component declarations agree on
//! every group key.

use bytemuck::{Pod, Zeroable};

use super::entity::Entity;
use super::storage::StorageRegistry;
use crate::error::JobsResult;

/// Marker trait for components.
///
/// Components must be:
/// - `Pod`: fixed layout, bitwise copyable
/// - `Send + Sync`: read from scheduler threads
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     const ID: ComponentId = ComponentId::new(3);
/// }
/// ```
pub trait Component: Copy + Pod + Zeroable + Send + Sync + 'static {
    /// Unique identifier for this component type.
    ///
    /// Two types declaring the same id is a programming error and panics on
    /// first storage access.
    const ID: ComponentId;
}

/// Stable numeric identity of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Creates a component id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns a well-mixed 64-bit hash of this id.
    ///
    /// SplitMix64 finalizer: stable across runs, platforms and builds.
    #[inline]
    #[must_use]
    pub const fn stable_hash(self) -> u64 {
        let mut z = (self.0 as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// Intern-table key of an entity group.
///
/// The XOR of the stable hashes of every member type. Distinct type sets can
/// collide; the world resolves that by probing with [`GroupKey::next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(u64);

impl GroupKey {
    /// Key of the group with no components.
    pub const EMPTY: Self = Self(0);

    /// Computes the key of a set of component types.
    ///
    /// Order does not matter. The caller is expected to pass each type once.
    #[must_use]
    pub fn of(types: &[ComponentId]) -> Self {
        Self(types.iter().fold(0, |acc, id| acc ^ id.stable_hash()))
    }

    /// Wraps a raw key.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw key.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The next probe position.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Normalizes a list of component ids into a sorted, deduplicated type set.
#[must_use]
pub fn normalize(types: &[ComponentId]) -> Vec<ComponentId> {
    let mut sorted = types.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}

/// A statically known set of components.
///
/// Implemented for `()` and tuples of up to eight components. Used both as
/// the initial bundle of a new entity and as the declared read set of a
/// [`ComponentSystem`](crate::jobs::ComponentSystem).
pub trait ComponentSet: Sized + Send + 'static {
    /// Ids of the member types, in declaration order.
    fn component_ids() -> Vec<ComponentId>;

    /// Writes every member into its storage for `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateComponent`](crate::JobsError::DuplicateComponent)
    /// if the entity already has one of the members.
    fn insert_into(self, storages: &StorageRegistry, entity: Entity) -> JobsResult<()>;

    /// Reads every member for `entity`, or `None` if any is missing.
    fn fetch_from(storages: &StorageRegistry, entity: Entity) -> Option<Self>;
}

impl ComponentSet for () {
    fn component_ids() -> Vec<ComponentId> {
        Vec::new()
    }

    fn insert_into(self, _storages: &StorageRegistry, _entity: Entity) -> JobsResult<()> {
        Ok(())
    }

    fn fetch_from(_storages: &StorageRegistry, _entity: Entity) -> Option<Self> {
        Some(())
    }
}

macro_rules! impl_component_set {
    ($($member:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($member: Component),+> ComponentSet for ($($member,)+) {
            fn component_ids() -> Vec<ComponentId> {
                vec![$($member::ID),+]
            }

            fn insert_into(self, storages: &StorageRegistry, entity: Entity) -> JobsResult<()> {
                let ($($member,)+) = self;
                $(storages.storage::<$member>().add(entity, $member)?;)+
                Ok(())
            }

            fn fetch_from(storages: &StorageRegistry, entity: Entity) -> Option<Self> {
                Some(($(storages.storage::<$member>().get(entity).ok()?,)+))
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Mass(f32);

    impl Component for Mass {
        const ID: ComponentId = ComponentId::new(10);
    }

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Charge(f32);

    impl Component for Charge {
        const ID: ComponentId = ComponentId::new(11);
    }

    #[test]
    fn test_stable_hash_is_deterministic() {
        let id = ComponentId::new(3);
        assert_eq!(id.stable_hash(), ComponentId::new(3).stable_hash());
        assert_ne!(id.stable_hash(), ComponentId::new(4).stable_hash());
    }

    #[test]
    fn test_group_key_ignores_order() {
        let a = ComponentId::new(1);
        let b = ComponentId::new(2);
        let c = ComponentId::new(3);
        assert_eq!(GroupKey::of(&[a, b, c]), GroupKey::of(&[c, a, b]));
        assert_eq!(GroupKey::of(&[]), GroupKey::EMPTY);
    }

    #[test]
    fn test_group_key_probe_wraps() {
        assert_eq!(GroupKey::from_raw(u64::MAX).next(), GroupKey::from_raw(0));
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let ids = [ComponentId::new(5), ComponentId::new(1), ComponentId::new(5)];
        assert_eq!(normalize(&ids), vec![ComponentId::new(1), ComponentId::new(5)]);
    }

    #[test]
    fn test_component_set_roundtrip() {
        let storages = StorageRegistry::new();
        let entity = Entity::from_raw(1);

        assert_eq!(
            <(Mass, Charge)>::component_ids(),
            vec![Mass::ID, Charge::ID]
        );

        (Mass(2.0), Charge(-1.0)).insert_into(&storages, entity).unwrap();
        let (mass, charge) = <(Mass, Charge)>::fetch_from(&storages, entity).unwrap();
        assert_eq!(mass, Mass(2.0));
        assert_eq!(charge, Charge(-1.0));

        assert!(<(Mass,)>::fetch_from(&storages, Entity::from_raw(2)).is_none());
    }
}
