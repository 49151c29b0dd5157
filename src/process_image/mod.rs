// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory coils and registers of a server
//!
//! All access happens within a transaction:
//!
//! ```
//! use modbus_engine::process_image::ProcessImage;
//!
//! let image = ProcessImage::new();
//! image
//!     .transaction(|tx| {
//!         tx.write_holding_registers(|registers| registers.set(0x10, 0x1234));
//!     })
//!     .unwrap();
//! let value = image
//!     .transaction(|tx| tx.read_holding_registers(|registers| registers.get(0x10)))
//!     .unwrap();
//! assert_eq!(value, 0x1234);
//! ```
//!
//! Each of the four tables is guarded by its own lock. Transactions that
//! access different tables do not contend, unless one of them is
//! [exclusive](ProcessImage::exclusive_transaction).

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;

use crate::{
    error::ProcessImageError,
    frame::{Address, Coil, Quantity, Word},
};

#[cfg(feature = "server")]
mod service;

#[cfg(feature = "server")]
pub use self::service::ProcessImageService;

/// A single write to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modification<V> {
    pub address: Address,
    pub value: V,
}

/// Gets notified about all writes to a [`ProcessImage`].
///
/// Listeners are invoked synchronously while the modified table is still
/// locked for writing. They must return quickly and must not access the
/// same process image.
pub trait ModificationListener: Send + Sync {
    fn on_coils_modified(&self, _modifications: &[Modification<Coil>]) {}

    fn on_discrete_inputs_modified(&self, _modifications: &[Modification<Coil>]) {}

    fn on_holding_registers_modified(&self, _modifications: &[Modification<Word>]) {}

    fn on_input_registers_modified(&self, _modifications: &[Modification<Word>]) {}
}

type Table<V> = RwLock<HashMap<Address, V>>;

type Listeners = RwLock<Vec<Arc<dyn ModificationListener>>>;

struct Inner {
    id: u64,
    global: RwLock<()>,
    coils: Table<Coil>,
    discrete_inputs: Table<Coil>,
    holding_registers: Table<Word>,
    input_registers: Table<Word>,
    listeners: Listeners,
}

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static OPEN_TRANSACTIONS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks a transaction as open on the current thread until dropped.
struct OpenTransaction(u64);

impl OpenTransaction {
    fn enter(id: u64) -> Result<Self, ProcessImageError> {
        OPEN_TRANSACTIONS.with(|open| {
            let mut open = open.borrow_mut();
            if open.contains(&id) {
                return Err(ProcessImageError::NestedTransaction);
            }
            open.push(id);
            Ok(Self(id))
        })
    }
}

impl Drop for OpenTransaction {
    fn drop(&mut self) {
        OPEN_TRANSACTIONS.with(|open| {
            let mut open = open.borrow_mut();
            if let Some(index) = open.iter().rposition(|id| *id == self.0) {
                open.remove(index);
            }
        });
    }
}

/// Coils, discrete inputs, holding registers, and input registers.
///
/// Absent entries read as `false` or `0`. Writing `false` or `0` removes
/// the entry, i.e. memory is only occupied by addresses with a value.
///
/// Clones share the same tables.
#[derive(Clone)]
pub struct ProcessImage {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProcessImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessImage")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessImage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessImage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
                global: RwLock::new(()),
                coils: RwLock::new(HashMap::new()),
                discrete_inputs: RwLock::new(HashMap::new()),
                holding_registers: RwLock::new(HashMap::new()),
                input_registers: RwLock::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Run `f` within a transaction that may run concurrently with other
    /// non-exclusive transactions.
    ///
    /// # Errors
    ///
    /// Fails if a transaction on this image is already open on the
    /// current thread.
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> Result<R, ProcessImageError> {
        let _open = OpenTransaction::enter(self.inner.id)?;
        let _shared = self.inner.global.read();
        Ok(f(&mut Transaction { image: &self.inner }))
    }

    /// Run `f` while no other transaction is running.
    ///
    /// # Errors
    ///
    /// Fails if a transaction on this image is already open on the
    /// current thread.
    pub fn exclusive_transaction<R>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> Result<R, ProcessImageError> {
        let _open = OpenTransaction::enter(self.inner.id)?;
        let _exclusive = self.inner.global.write();
        Ok(f(&mut Transaction { image: &self.inner }))
    }

    pub fn add_listener(&self, listener: Arc<dyn ModificationListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Returns `true` if the listener had been registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ModificationListener>) -> bool {
        let mut listeners = self.inner.listeners.write();
        let len = listeners.len();
        listeners.retain(|registered| !Arc::ptr_eq(registered, listener));
        listeners.len() < len
    }
}

/// Read-only view of a table.
#[derive(Debug, Clone, Copy)]
pub struct View<'a, V> {
    table: &'a HashMap<Address, V>,
}

impl<V: Copy + Default> View<'_, V> {
    #[must_use]
    pub fn get(&self, address: Address) -> V {
        get(self.table, address)
    }

    /// Values of `cnt` consecutive addresses.
    ///
    /// Stops at the end of the address space.
    #[must_use]
    pub fn get_range(&self, address: Address, cnt: Quantity) -> Vec<V> {
        get_range(self.table, address, cnt)
    }

    /// Number of addresses with a value other than `false` or `0`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All addresses with a value other than `false` or `0`, unordered.
    pub fn iter(&self) -> impl Iterator<Item = (Address, V)> + '_ {
        self.table.iter().map(|(address, value)| (*address, *value))
    }
}

/// Writable view of a table.
///
/// Every write is recorded and reported to the listeners when the view
/// is released.
#[derive(Debug)]
pub struct ViewMut<'a, V> {
    table: &'a mut HashMap<Address, V>,
    modifications: Vec<Modification<V>>,
}

impl<V: Copy + Default + PartialEq> ViewMut<'_, V> {
    #[must_use]
    pub fn get(&self, address: Address) -> V {
        get(self.table, address)
    }

    #[must_use]
    pub fn get_range(&self, address: Address, cnt: Quantity) -> Vec<V> {
        get_range(self.table, address, cnt)
    }

    pub fn set(&mut self, address: Address, value: V) {
        if value == V::default() {
            self.table.remove(&address);
        } else {
            self.table.insert(address, value);
        }
        self.modifications.push(Modification { address, value });
    }

    /// Write consecutive addresses starting at `address`.
    ///
    /// Values beyond the end of the address space are ignored.
    pub fn set_range(&mut self, address: Address, values: &[V]) {
        for (address, value) in (u32::from(address)..)
            .map_while(|address| Address::try_from(address).ok())
            .zip(values)
        {
            self.set(address, *value);
        }
    }
}

fn get<V: Copy + Default>(table: &HashMap<Address, V>, address: Address) -> V {
    table.get(&address).copied().unwrap_or_default()
}

fn get_range<V: Copy + Default>(
    table: &HashMap<Address, V>,
    address: Address,
    cnt: Quantity,
) -> Vec<V> {
    let start = u32::from(address);
    (start..start + u32::from(cnt))
        .map_while(|address| Address::try_from(address).ok())
        .map(|address| get(table, address))
        .collect()
}

fn read<V, R>(table: &Table<V>, f: impl FnOnce(View<'_, V>) -> R) -> R {
    let table = table.read();
    f(View { table: &table })
}

fn write<V, R>(
    table: &Table<V>,
    listeners: &Listeners,
    notify: impl Fn(&dyn ModificationListener, &[Modification<V>]),
    f: impl FnOnce(&mut ViewMut<'_, V>) -> R,
) -> R {
    let mut table = table.write();
    let mut view = ViewMut {
        table: &mut table,
        modifications: Vec::new(),
    };
    let result = f(&mut view);
    let modifications = view.modifications;
    if !modifications.is_empty() {
        // the table stays locked while listeners are notified
        let listeners = listeners.read().clone();
        for listener in &listeners {
            notify(listener.as_ref(), &modifications);
        }
    }
    drop(table);
    result
}

/// Access to the tables of a [`ProcessImage`].
///
/// Only one table can be accessed at a time.
pub struct Transaction<'a> {
    image: &'a Inner,
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("image", &self.image.id)
            .finish()
    }
}

impl Transaction<'_> {
    pub fn read_coils<R>(&mut self, f: impl FnOnce(View<'_, Coil>) -> R) -> R {
        read(&self.image.coils, f)
    }

    pub fn read_discrete_inputs<R>(&mut self, f: impl FnOnce(View<'_, Coil>) -> R) -> R {
        read(&self.image.discrete_inputs, f)
    }

    pub fn read_holding_registers<R>(&mut self, f: impl FnOnce(View<'_, Word>) -> R) -> R {
        read(&self.image.holding_registers, f)
    }

    pub fn read_input_registers<R>(&mut self, f: impl FnOnce(View<'_, Word>) -> R) -> R {
        read(&self.image.input_registers, f)
    }

    pub fn write_coils<R>(&mut self, f: impl FnOnce(&mut ViewMut<'_, Coil>) -> R) -> R {
        write(
            &self.image.coils,
            &self.image.listeners,
            |listener, modifications| listener.on_coils_modified(modifications),
            f,
        )
    }

    pub fn write_discrete_inputs<R>(&mut self, f: impl FnOnce(&mut ViewMut<'_, Coil>) -> R) -> R {
        write(
            &self.image.discrete_inputs,
            &self.image.listeners,
            |listener, modifications| listener.on_discrete_inputs_modified(modifications),
            f,
        )
    }

    pub fn write_holding_registers<R>(
        &mut self,
        f: impl FnOnce(&mut ViewMut<'_, Word>) -> R,
    ) -> R {
        write(
            &self.image.holding_registers,
            &self.image.listeners,
            |listener, modifications| listener.on_holding_registers_modified(modifications),
            f,
        )
    }

    pub fn write_input_registers<R>(&mut self, f: impl FnOnce(&mut ViewMut<'_, Word>) -> R) -> R {
        write(
            &self.image.input_registers,
            &self.image.listeners,
            |listener, modifications| listener.on_input_registers_modified(modifications),
            f,
        )
    }
}
