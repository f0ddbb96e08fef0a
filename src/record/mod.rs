//! The [`Record`] trait and the type-erased registry built on top of it.
//!
//! The source this crate's design is drawn from describes each record type as a vtable of
//! function pointers (write / read / get_id / set_id / init / destroy / skip) installed at
//! registration time. The statically-typed re-expression of that idea is a trait the user
//! implements on their own struct; [`TypeEntry`] is the "table of boxed closures owned by
//! the database" from the design notes — closures captured over the concrete `T` at
//! [`crate::store::Database::register`] time, so the registry itself stays non-generic.

#[cfg(test)]
mod tests;

use std::any::Any;
use std::io::{Read, Write};

use crate::error::{Result, StoreError};
use crate::io::{Reader, Writer};

/// A value type that can be persisted by the store.
///
/// `id` is the entity id assigned by [`crate::store::Database::add`]; a freshly constructed
/// record should report `id() == 0` ("unassigned") until the store calls [`Record::set_id`].
pub trait Record: Any + Send + Sync + Clone + 'static {
    /// Stable name identifying this record type, used for registration and lookups.
    fn type_name() -> &'static str
    where
        Self: Sized;

    /// The record's entity id, or `0` if unassigned.
    fn id(&self) -> u32;

    /// Install an entity id assigned by `add`.
    fn set_id(&mut self, id: u32);

    /// Serialize `self` into `w`.
    fn write_to(&self, w: &mut Writer<&mut dyn Write>) -> Result<()>;

    /// Deserialize a value of this type from `r`.
    fn read_from(r: &mut Reader<&mut dyn Read>) -> Result<Self>
    where
        Self: Sized;

    /// Advance `r` past one encoded record of this type without materializing it.
    ///
    /// The default implementation reads and discards a full value; override when a
    /// cheaper skip is possible (e.g. a fixed-size record needs no more than `r.skip(N)`).
    fn skip(r: &mut Reader<&mut dyn Read>) -> Result<()>
    where
        Self: Sized,
    {
        Self::read_from(r).map(|_| ())
    }

    /// Field descriptors exposed for the query engine. Empty by default: a type only
    /// needs these if it is queried via [`crate::query::Query`].
    fn fields() -> &'static [FieldDescriptor<Self>]
    where
        Self: Sized,
    {
        &[]
    }
}

/// A queryable field on a [`Record`] type: a name paired with an accessor that extracts a
/// [`crate::query::FieldValue`] from a record instance.
///
/// Rust records aren't POD the way the byte-offset/byte-size field descriptors in the
/// original design assume; an accessor closure is the idiomatic replacement and composes
/// fine with derived getters, enum fields, etc.
pub struct FieldDescriptor<T> {
    /// Field name as referenced from [`crate::query::Condition`].
    pub name: &'static str,
    /// Extracts this field's current value from a record instance.
    pub get: fn(&T) -> crate::query::FieldValue,
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            get: self.get,
        }
    }
}
impl<T> Copy for FieldDescriptor<T> {}

/// A type-erased registration entry: the boxed-closure table described above.
pub(crate) struct TypeEntry {
    pub(crate) name: String,
    pub(crate) next_id: u32,
    write: Box<
        dyn Fn(&(dyn Any + Send + Sync), &mut Writer<&mut dyn Write>) -> Result<()> + Send + Sync,
    >,
    read: Box<dyn Fn(&mut Reader<&mut dyn Read>) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>,
    skip: Box<dyn Fn(&mut Reader<&mut dyn Read>) -> Result<()> + Send + Sync>,
    get_id: Box<dyn Fn(&(dyn Any + Send + Sync)) -> u32 + Send + Sync>,
    set_id: Box<dyn Fn(&mut (dyn Any + Send + Sync), u32) + Send + Sync>,
    field_names: Vec<&'static str>,
    field_get: Vec<Box<dyn Fn(&(dyn Any + Send + Sync)) -> crate::query::FieldValue + Send + Sync>>,
}

impl TypeEntry {
    pub(crate) fn for_type<T: Record>() -> Self {
        let fields = T::fields();
        let field_names = fields.iter().map(|f| f.name).collect();
        let field_get: Vec<_> = fields
            .iter()
            .map(|f| {
                let getter = f.get;
                let boxed: Box<
                    dyn Fn(&(dyn Any + Send + Sync)) -> crate::query::FieldValue + Send + Sync,
                > = Box::new(move |any| {
                    let t = any
                        .downcast_ref::<T>()
                        .expect("type registry invariant: downcast always matches registration");
                    getter(t)
                });
                boxed
            })
            .collect();

        Self {
            name: T::type_name().to_string(),
            next_id: 1,
            write: Box::new(|any, w| {
                let t = any
                    .downcast_ref::<T>()
                    .expect("type registry invariant: downcast always matches registration");
                t.write_to(w)
            }),
            read: Box::new(|r| {
                Ok(Box::new(
                    T::read_from(r).map_err(StoreError::into_corrupt_if_frame)?,
                ))
            }),
            skip: Box::new(|r| T::skip(r).map_err(StoreError::into_corrupt_if_frame)),
            get_id: Box::new(|any| {
                any.downcast_ref::<T>()
                    .expect("type registry invariant: downcast always matches registration")
                    .id()
            }),
            set_id: Box::new(|any, id| {
                any.downcast_mut::<T>()
                    .expect("type registry invariant: downcast always matches registration")
                    .set_id(id)
            }),
            field_names,
            field_get,
        }
    }

    pub(crate) fn write_any(
        &self,
        value: &(dyn Any + Send + Sync),
        w: &mut Writer<&mut dyn Write>,
    ) -> Result<()> {
        (self.write)(value, w)
    }

    pub(crate) fn read_any(
        &self,
        r: &mut Reader<&mut dyn Read>,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        (self.read)(r)
    }

    pub(crate) fn skip_one(&self, r: &mut Reader<&mut dyn Read>) -> Result<()> {
        (self.skip)(r)
    }

    pub(crate) fn id_of(&self, value: &(dyn Any + Send + Sync)) -> u32 {
        (self.get_id)(value)
    }

    pub(crate) fn set_id_of(&self, value: &mut (dyn Any + Send + Sync), id: u32) {
        (self.set_id)(value, id)
    }

    pub(crate) fn field_value(
        &self,
        field_name: &str,
        value: &(dyn Any + Send + Sync),
    ) -> Result<crate::query::FieldValue> {
        for (name, getter) in self.field_names.iter().zip(self.field_get.iter()) {
            if *name == field_name {
                return Ok(getter(value));
            }
        }
        Err(StoreError::InvalidArg(format!(
            "unknown field `{field_name}` on type `{}`",
            self.name
        )))
    }
}
