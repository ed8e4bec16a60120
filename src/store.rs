//! Entity store over sled.
//!
//! One tree per collection, records encoded as CBOR. Every mutation of a
//! guarded field (project status and sale flags, order status and transaction
//! id) goes through [`Store::update_with`] or one of the multi-tree
//! transactions below, never through a blind read-then-write.
use super::error::{MarketError, MarketResult};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::sync::Arc;

pub const USERS: &str = "users";
pub const EMAILS: &str = "emails";
pub const TOKENS: &str = "tokens";
pub const PROJECTS: &str = "projects";
pub const ORDERS: &str = "orders";
pub const OPEN_ORDERS: &str = "open_orders";
pub const TRANSACTIONS: &str = "transactions";
pub const REVIEWS: &str = "reviews";
pub const NOTIFICATIONS: &str = "notifications";

/// A record that can live in a store tree, keyed by its id.
pub trait Record: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    const TREE: &'static str;
    const ENTITY: &'static str;

    fn key(&self) -> &str;
}

#[derive(Clone)]
pub struct Store {
    instance: Arc<Db>,
    pub(crate) users: Tree,
    pub(crate) emails: Tree,
    pub(crate) tokens: Tree,
    pub(crate) projects: Tree,
    pub(crate) orders: Tree,
    pub(crate) open_orders: Tree,
    pub(crate) transactions: Tree,
    pub(crate) reviews: Tree,
    pub(crate) notifications: Tree,
}

impl Store {
    pub fn new(instance: Arc<Db>) -> MarketResult<Self> {
        Ok(Self {
            users: instance.open_tree(USERS)?,
            emails: instance.open_tree(EMAILS)?,
            tokens: instance.open_tree(TOKENS)?,
            projects: instance.open_tree(PROJECTS)?,
            orders: instance.open_tree(ORDERS)?,
            open_orders: instance.open_tree(OPEN_ORDERS)?,
            transactions: instance.open_tree(TRANSACTIONS)?,
            reviews: instance.open_tree(REVIEWS)?,
            notifications: instance.open_tree(NOTIFICATIONS)?,
            instance,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> MarketResult<Self> {
        Self::new(Arc::new(sled::open(path)?))
    }

    /// An in-memory database removed on drop. Used by tests and sandbox runs.
    pub fn temporary() -> MarketResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(Arc::new(db))
    }

    pub fn flush(&self) -> MarketResult<()> {
        self.instance.flush()?;
        Ok(())
    }

    pub(crate) fn tree(&self, name: &str) -> &Tree {
        match name {
            USERS => &self.users,
            EMAILS => &self.emails,
            TOKENS => &self.tokens,
            PROJECTS => &self.projects,
            ORDERS => &self.orders,
            OPEN_ORDERS => &self.open_orders,
            TRANSACTIONS => &self.transactions,
            REVIEWS => &self.reviews,
            _ => &self.notifications,
        }
    }

    pub fn get<R: Record>(&self, id: &str) -> MarketResult<Option<R>> {
        match self.tree(R::TREE).get(id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`Store::get`] but a missing record is `NotFound`.
    pub fn fetch<R: Record>(&self, id: &str) -> MarketResult<R> {
        self.get(id)?
            .ok_or_else(|| MarketError::not_found(R::ENTITY, id))
    }

    /// Inserts a brand new record; fails with `Conflict` if the key is taken.
    pub fn create<R: Record>(&self, record: &R) -> MarketResult<()> {
        let bytes = minicbor::to_vec(record)?;
        self.tree(R::TREE)
            .compare_and_swap(record.key().as_bytes(), None as Option<&[u8]>, Some(bytes))?
            .map_err(|_| {
                MarketError::Conflict(format!("{} {} already exists", R::ENTITY, record.key()))
            })
    }

    /// Upserts a record. Only for records without guarded state, such as
    /// credentials and read markers.
    pub fn put<R: Record>(&self, record: &R) -> MarketResult<()> {
        self.tree(R::TREE)
            .insert(record.key().as_bytes(), minicbor::to_vec(record)?)?;
        Ok(())
    }

    pub fn remove<R: Record>(&self, id: &str) -> MarketResult<Option<R>> {
        match self.tree(R::TREE).remove(id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomic conditional update of one record.
    ///
    /// `apply` sees the current record, checks its preconditions and returns
    /// the replacement. The swap only lands if nobody wrote the record in
    /// between; otherwise `apply` runs again on the fresh state, so a
    /// precondition that held for a competing writer fails for this one.
    pub fn update_with<R, F>(&self, id: &str, mut apply: F) -> MarketResult<R>
    where
        R: Record,
        F: FnMut(R) -> MarketResult<R>,
    {
        let tree = self.tree(R::TREE);
        loop {
            let current = tree
                .get(id.as_bytes())?
                .ok_or_else(|| MarketError::not_found(R::ENTITY, id))?;
            let next = apply(minicbor::decode(&current)?)?;
            let encoded = minicbor::to_vec(&next)?;

            match tree.compare_and_swap(id.as_bytes(), Some(&current), Some(encoded))? {
                Ok(()) => return Ok(next),
                Err(_) => {
                    tracing::trace!(entity = R::ENTITY, id, "lost compare-and-swap race, retrying");
                    continue;
                }
            }
        }
    }

    /// Removes a record only if `check` accepts its current state, with the
    /// same compare-and-swap retry as [`Store::update_with`].
    pub fn remove_if<R, F>(&self, id: &str, mut check: F) -> MarketResult<R>
    where
        R: Record,
        F: FnMut(&R) -> MarketResult<()>,
    {
        let tree = self.tree(R::TREE);
        loop {
            let current = tree
                .get(id.as_bytes())?
                .ok_or_else(|| MarketError::not_found(R::ENTITY, id))?;
            let record: R = minicbor::decode(&current)?;
            check(&record)?;

            match tree.compare_and_swap(id.as_bytes(), Some(&current), None as Option<Vec<u8>>)? {
                Ok(()) => return Ok(record),
                Err(_) => continue,
            }
        }
    }

    /// Decodes every record of a tree that satisfies `keep`.
    pub fn scan<R, F>(&self, mut keep: F) -> MarketResult<Vec<R>>
    where
        R: Record,
        F: FnMut(&R) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.tree(R::TREE).iter() {
            let (_, bytes) = entry?;
            let record: R = minicbor::decode(&bytes)?;
            if keep(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Runs `body` as one serializable transaction across several trees.
    /// Aborting with a `MarketError` rolls every tree back.
    pub(crate) fn transact<T, F>(&self, trees: &[&str], body: F) -> MarketResult<T>
    where
        F: Fn(&[sled::transaction::TransactionalTree]) -> TxResult<T>,
    {
        let trees: Vec<&Tree> = trees.iter().map(|name| self.tree(name)).collect();
        trees
            .as_slice()
            .transaction(|txn| body(txn))
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => err.into(),
            })
    }
}

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<MarketError>>;

/// Reads and decodes a record inside a transaction.
pub(crate) fn tx_get<R: Record>(
    tree: &sled::transaction::TransactionalTree,
    id: &str,
) -> TxResult<Option<R>> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => minicbor::decode(&bytes)
            .map(Some)
            .map_err(|err| abort(err.into())),
        None => Ok(None),
    }
}

/// Encodes and writes a record inside a transaction.
pub(crate) fn tx_put<R: Record>(
    tree: &sled::transaction::TransactionalTree,
    record: &R,
) -> TxResult<()> {
    let bytes = minicbor::to_vec(record).map_err(|err| abort(err.into()))?;
    tree.insert(record.key().as_bytes(), bytes)?;
    Ok(())
}

pub(crate) fn abort(err: MarketError) -> ConflictableTransactionError<MarketError> {
    ConflictableTransactionError::Abort(err)
}
