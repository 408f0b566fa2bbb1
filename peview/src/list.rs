use std::fmt;
use std::marker::PhantomData;
use std::ops::Index;

use tracing::debug;

use crate::address::{FileOffset, Rva};
use crate::from_byte_slice::FromByteSlice;
use crate::image::Image;
use crate::load::{LoadContext, Span, Structure};
use crate::segment::Segment;


/// A run of consecutive structures of one kind, such as the section table.
///
/// The number of elements comes from elsewhere in the file and is bounded by a ceiling. When
/// the file asks for more than the ceiling, the list either fails as a whole or, if truncation
/// is enabled, loads the first `ceiling` elements and reports itself partly loaded.
///
/// Reloading a list reuses its element nodes, so elements whose bytes did not change report no
/// difference.
#[derive(Clone, Debug)]
pub struct SpanList<T> {
    span: Span,
    items: Vec<T>,
    maximum_count: usize,
    truncate_if_exceeded: bool,
}
impl<T> SpanList<T> {
    pub(crate) fn new(maximum_count: usize, truncate_if_exceeded: bool) -> Self {
        Self {
            span: Span::default(),
            items: Vec::new(),
            maximum_count,
            truncate_if_exceeded,
        }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn maximum_count(&self) -> usize { self.maximum_count }
    pub fn get(&self, index: usize) -> Option<&T> { self.items.get(index) }
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> { self.items.get_mut(index) }
    pub fn first(&self) -> Option<&T> { self.items.first() }
    pub fn last(&self) -> Option<&T> { self.items.last() }
    pub fn as_slice(&self) -> &[T] { &self.items }
    pub fn iter(&self) -> std::slice::Iter<'_, T> { self.items.iter() }
}
impl<T: Structure + Default> SpanList<T> {
    /// Loads the list.
    ///
    /// `expected_count` is only consulted once the list knows it is going to parse anything.
    /// `load_element` loads one element from the shared context.
    pub(crate) fn load_with<C, L>(&mut self, context: &mut LoadContext, expected_count: C, mut load_element: L)
        where
            C: FnOnce() -> usize,
            L: FnMut(&mut T, &mut LoadContext),
    {
        let start = context.data.clone();
        let old = self.span.raw_data().clone();

        if !self.span.pre_load(context) {
            self.items.clear();
            return;
        }

        let expected = expected_count();
        if expected == 0 {
            self.items.clear();
            self.span.set_not_exist();
            return;
        }
        if expected > self.maximum_count && !self.truncate_if_exceeded {
            debug!("list expects {} elements, more than the maximum of {}", expected, self.maximum_count);
            self.items.clear();
            self.span.set_error(&mut context.next);
            return;
        }

        let count = expected.min(self.maximum_count);
        let mut produced = 0;
        while produced < count {
            if produced == self.items.len() {
                self.items.push(T::default());
            }
            load_element(&mut self.items[produced], context);
            if !context.next {
                break;
            }
            produced += 1;
        }
        self.items.truncate(produced);

        if produced == 0 {
            debug!("none of the {} expected list elements loaded", expected);
            self.span.set_error(&mut context.next);
            return;
        }
        let length = context.consumed_since(&start);
        self.span.commit(context, &start, &old, length, produced != expected);
    }
}
impl<T> Structure for SpanList<T> {
    fn span(&self) -> &Span { &self.span }
}
impl<T> Index<usize> for SpanList<T> {
    type Output = T;
    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}
impl<'a, T> IntoIterator for &'a SpanList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}


/// A read-only view of consecutive fixed-size values, such as an export address table.
///
/// Creating one is cheap; it is not cached anywhere.
#[derive(Clone)]
pub struct TypedList<T> {
    data: Segment,
    count: usize,
    element: PhantomData<T>,
}
impl<T> Default for TypedList<T> {
    fn default() -> Self {
        Self {
            data: Segment::default(),
            count: 0,
            element: PhantomData,
        }
    }
}
impl<T: FromByteSlice> TypedList<T> {
    pub(crate) fn new(data: Segment, count: usize) -> Self {
        debug_assert!(data.len() >= count * T::SIZE);
        Self {
            data,
            count,
            element: PhantomData,
        }
    }

    /// The list of `expected` elements at `rva`, capped at or rejected above `maximum` as the
    /// image's options dictate. Empty if the address cannot be mapped or the bytes run out.
    pub(crate) fn create(image: &Image, rva: Rva, expected: usize, maximum: usize) -> Self {
        if expected == 0 {
            return Self::default();
        }
        if expected > maximum && !image.options().truncate_if_exceeded {
            debug!("typed list at {} expects {} elements, more than the maximum of {}", rva, expected, maximum);
            return Self::default();
        }
        let count = expected.min(maximum);
        let data = image.create_segment_at_len(rva, count * T::SIZE);
        if data.is_empty() {
            debug!("typed list of {} elements at {} is not within the image", count, rva);
            return Self::default();
        }
        Self::new(data, count)
    }

    pub fn len(&self) -> usize { self.count }
    pub fn is_empty(&self) -> bool { self.count == 0 }
    pub fn raw_data(&self) -> &Segment { &self.data }
    pub fn start_offset(&self) -> FileOffset { FileOffset(self.data.index() as u32) }
    pub fn end_offset(&self) -> FileOffset { FileOffset((self.data.index() + self.data.len()) as u32) }

    pub fn try_get(&self, index: usize) -> Option<T> {
        if index >= self.count {
            return None;
        }
        self.data.try_read(index * T::SIZE)
    }

    /// # Panics
    ///
    /// Panics if `index` is not less than [`len`](TypedList::len).
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.count, "index {} out of range for list of {} elements", index, self.count);
        self.data.read(index * T::SIZE)
    }

    pub fn iter(&self) -> TypedListIter<'_, T> {
        TypedListIter {
            list: self,
            index: 0,
        }
    }
}
impl<T: FromByteSlice + fmt::Debug> fmt::Debug for TypedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter())
            .finish()
    }
}
impl<'a, T: FromByteSlice> IntoIterator for &'a TypedList<T> {
    type Item = T;
    type IntoIter = TypedListIter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct TypedListIter<'a, T> {
    list: &'a TypedList<T>,
    index: usize,
}
impl<'a, T: FromByteSlice> TypedListIter<'a, T> {
    /// Elements left, not counting any whose bytes were cut off since the list was created.
    fn remaining(&self) -> usize {
        let readable = self.list.data.with_bytes(|bytes| bytes.len()) / T::SIZE;
        self.list.count.min(readable).saturating_sub(self.index)
    }
}
impl<'a, T: FromByteSlice> Iterator for TypedListIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.list.try_get(self.index)?;
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}
impl<'a, T: FromByteSlice> ExactSizeIterator for TypedListIter<'a, T> {
}
