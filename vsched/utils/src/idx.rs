//! Dense maps keyed by small integer indices.
//!
//! Schedule units refer to each other through these indices rather than
//! through pointers, which keeps the dependency graph free of cyclic
//! ownership while still allowing O(1) lookup.
use std::{
    marker::PhantomData,
    ops::{self, Index},
};

pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    fn new(input: usize) -> Self;
}

#[macro_export]
/// Implements [IndexRef] for a type wrapping an unsigned integer. The
/// backing type is [`u32`](std::u32) unless another one is given as the
/// second argument.
macro_rules! impl_index {
    ($struct_name: ident) => {
        $crate::impl_index!($struct_name, u32);
    };

    ($struct_name: ident, $backing_ty: ty) => {
        impl $crate::IndexRef for $struct_name {
            fn index(&self) -> usize {
                self.0 as usize
            }

            fn new(input: usize) -> Self {
                Self(input as $backing_ty)
            }
        }

        impl From<$backing_ty> for $struct_name {
            fn from(input: $backing_ty) -> Self {
                $struct_name(input)
            }
        }
    };
}

/// A map from an index type `K` to values `D`, backed by a vector. Keys are
/// handed out by [IndexedMap::push] in increasing order and are never reused.
#[derive(Debug, Clone)]
pub struct IndexedMap<K, D>
where
    K: IndexRef,
{
    data: Vec<D>,
    phantom: PhantomData<K>,
}

impl<K, D> IndexedMap<K, D>
where
    K: IndexRef,
{
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub fn get(&self, index: K) -> Option<&D> {
        self.data.get(index.index())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn push(&mut self, item: D) -> K {
        self.data.push(item);
        K::new(self.data.len() - 1)
    }

    /// The key the next call to [IndexedMap::push] will return.
    pub fn peek_next_idx(&self) -> K {
        K::new(self.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, index: K) -> bool {
        index.index() < self.data.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &D> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + use<K, D> {
        (0..self.data.len()).map(K::new)
    }

    /// Consume the map, yielding its values in key order.
    pub fn into_values(self) -> std::vec::IntoIter<D> {
        self.data.into_iter()
    }
}

impl<K, D> Index<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<K, D> ops::IndexMut<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

impl<K, D> Default for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}
