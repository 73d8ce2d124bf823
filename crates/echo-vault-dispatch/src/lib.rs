// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request validation and command routing for the vault server
//! (SPEC_FULL.md §4.5).
//!
//! [`Dispatcher::dispatch`] is, modulo the lock acquisitions buried inside
//! [`StorageAdapter`], a pure function of `(command, args, data) ->
//! response`: validate, classify file-level vs. node-level, call through
//! to storage, map errors to status codes, and build a `{status, data}`
//! response. It never fails outward — every error path produces a
//! [`Response`] carrying the matching [`Status`], never a `Result` the
//! caller has to further translate.

mod args;
mod error;
mod path;

pub use error::map_storage_error;

use echo_vault_lock::{HolderId, LockService};
use echo_vault_proto::{NodeDescriptor, NodeKind, Request, Response, Status, Value};
use echo_vault_storage::StorageAdapter;
use std::path::PathBuf;

/// Routes decoded requests to [`StorageAdapter`] operations.
pub struct Dispatcher {
    storage: StorageAdapter,
}

impl Dispatcher {
    /// Builds a dispatcher rooted at `base`, coordinating access through
    /// `locks`.
    #[must_use]
    pub fn new(base: PathBuf, locks: LockService) -> Self {
        Self {
            storage: StorageAdapter::new(base, locks),
        }
    }

    /// The storage adapter backing this dispatcher, for callers (e.g. the
    /// connection server) that need the base directory at startup.
    #[must_use]
    pub fn storage(&self) -> &StorageAdapter {
        &self.storage
    }

    /// Validates, routes, and executes `request`, returning a response
    /// that always carries a status — this call cannot itself fail.
    pub async fn dispatch(&self, request: &Request, holder: HolderId) -> Response {
        let response = match self.route(request, holder).await {
            Ok(response) => response,
            Err(status) => Response::error(status),
        };
        tracing::debug!(command = %request.command, status = response.status.code(), holder, "dispatched");
        response
    }

    async fn route(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        match request.command.as_str() {
            "create_db" => self.create_db(request, holder).await,
            "rename_db" => self.rename_db(request, holder).await,
            "delete_db" => self.delete_db(request, holder).await,
            "use_db" => self.use_db(request, holder).await,
            "list_dbs" => Ok(self.list_dbs()),
            "get_filesize" => self.get_filesize(request, holder).await,
            "create_group" => self.create_group(request, holder).await,
            "require_group" => self.require_group(request, holder).await,
            "create_dataset" => self.create_dataset(request, holder).await,
            "require_dataset" => self.require_dataset(request, holder).await,
            "get_node" => self.get_node(request, holder).await,
            "get_keys" => self.get_keys(request, holder).await,
            "get_tree" => self.get_tree(request, holder).await,
            "contains" => self.contains(request, holder).await,
            "delete_node" => self.delete_node(request, holder).await,
            "slice_dataset" => self.slice_dataset(request, holder).await,
            "broadcast_dataset" => self.broadcast_dataset(request, holder).await,
            "attrs_get" => self.attrs_get(request, holder).await,
            "attrs_set" => self.attrs_set(request, holder).await,
            "attrs_contains" => self.attrs_contains(request, holder).await,
            "attrs_keys" => self.attrs_keys(request, holder).await,
            "attrs_del" => self.attrs_del(request, holder).await,
            _ => Err(Status::UnknownCommand),
        }
    }

    // ---- argument extraction shared by every handler ----------------

    fn require_db<'a>(request: &'a Request) -> Result<&'a str, Status> {
        let db = request.database.as_deref().ok_or(Status::MissingArgument)?;
        path::validate_db_name(db)?;
        Ok(db)
    }

    /// Shared preamble for every node-level command (SPEC_FULL.md §4.5
    /// step 3): the database must exist and the path must be non-empty,
    /// in that order, *before* any node-level validation runs.
    async fn node_preamble<'a>(
        &self,
        request: &'a Request,
        holder: HolderId,
    ) -> Result<(&'a str, &'a str), Status> {
        let db = Self::require_db(request)?;
        let path = request.path.as_deref().ok_or(Status::MissingArgument)?;
        path::validate_node_path(path)?;
        let exists = self.storage.db_exists(db, holder).await.map_err(|e| error::map_storage_error(&e))?;
        if !exists {
            return Err(Status::FileNotFound);
        }
        Ok((db, path))
    }

    // ---- file-level commands ------------------------------------------

    async fn create_db(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let db = Self::require_db(request)?;
        let overwrite = args::as_bool(request.kwarg("overwrite"));
        self.storage
            .create_db(db, overwrite, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Created, None))
    }

    async fn rename_db(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let db = Self::require_db(request)?;
        let new_name = request
            .kwarg("db_new_name")
            .and_then(Value::as_str)
            .ok_or(Status::MissingArgument)?;
        path::validate_db_name(new_name)?;
        self.storage
            .rename_db(db, new_name, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        let node = NodeDescriptor {
            kind: NodeKind::Group,
            path: new_name.to_owned(),
            shape: None,
            dtype: None,
        };
        Ok(Response::new(Status::Ok, Some(Value::Node(node))))
    }

    async fn delete_db(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let db = Self::require_db(request)?;
        self.storage.delete_db(db, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::ok())
    }

    async fn use_db(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let db = Self::require_db(request)?;
        let exists = self.storage.db_exists(db, holder).await.map_err(|e| error::map_storage_error(&e))?;
        if !exists {
            return Err(Status::FileNotFound);
        }
        Ok(Response::ok())
    }

    fn list_dbs(&self) -> Response {
        let names = self.storage.list_dbs();
        let value = Value::Map(vec![(
            "nodekeys".to_owned(),
            Value::Tuple(names.into_iter().map(Value::Str).collect()),
        )]);
        Response::new(Status::Ok, Some(value))
    }

    async fn get_filesize(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let db = Self::require_db(request)?;
        let size = self.storage.filesize(db, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Ok, Some(Value::Int(i64::try_from(size).unwrap_or(i64::MAX)))))
    }

    // ---- node-level commands -------------------------------------------

    async fn create_group(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        self.storage
            .create_group(db, path, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::ok())
    }

    async fn require_group(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        self.storage
            .require_group(db, path, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::ok())
    }

    async fn create_dataset(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let array = match request.data.as_ref() {
            Some(Value::Nil) | None => {
                let shape = request.kwarg("shape").and_then(args::as_shape);
                let dtype = request.kwarg("dtype").and_then(args::as_dtype);
                match (shape, dtype) {
                    (Some(shape), Some(dtype)) => args::zero_array(dtype, shape),
                    _ => return Err(Status::MissingData),
                }
            }
            Some(v) => args::as_array(v).ok_or(Status::InvalidArgument)?,
        };
        let node = self
            .storage
            .create_dataset(db, path, &array, false, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Ok, Some(Value::Node(node))))
    }

    async fn require_dataset(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let data_array = request.data.as_ref().and_then(args::as_array);
        let shape = request
            .kwarg("shape")
            .and_then(args::as_shape)
            .or_else(|| data_array.as_ref().map(|a| a.shape.clone()));
        let dtype = request
            .kwarg("dtype")
            .and_then(args::as_dtype)
            .or_else(|| data_array.as_ref().map(|a| a.dtype));
        let (Some(shape), Some(dtype)) = (shape, dtype) else {
            return Err(Status::MissingData);
        };
        let node = self
            .storage
            .require_dataset(db, path, dtype, &shape, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Ok, Some(Value::Node(node))))
    }

    async fn get_node(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let node = self.storage.get_node(db, path, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Ok, Some(Value::Node(node))))
    }

    async fn get_keys(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let keys = self.storage.get_keys(db, path, holder).await.map_err(Self::dataset_target_is_invalid_argument)?;
        let value = Value::Map(vec![(
            "nodekeys".to_owned(),
            Value::Tuple(keys.into_iter().map(Value::Str).collect()),
        )]);
        Ok(Response::new(Status::Ok, Some(value)))
    }

    async fn get_tree(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let tree = self.storage.get_tree(db, path, holder).await.map_err(Self::dataset_target_is_invalid_argument)?;
        let value = Value::Map(vec![("nodetree".to_owned(), tree)]);
        Ok(Response::new(Status::Ok, Some(value)))
    }

    /// `get_keys`/`get_tree` targeting a dataset is `INVALID_ARGUMENT`
    /// rather than the generic `TYPE_ERROR` [`map_storage_error`] would
    /// otherwise give `StorageError::TypeError` (SPEC_FULL.md §4.5).
    fn dataset_target_is_invalid_argument(err: echo_vault_storage::StorageError) -> Status {
        match err {
            echo_vault_storage::StorageError::TypeError(_) => Status::InvalidArgument,
            other => error::map_storage_error(&other),
        }
    }

    async fn contains(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let present = self.storage.contains(db, path, holder).await.map_err(|e| error::map_storage_error(&e))?;
        let value = Value::Map(vec![("contains".to_owned(), Value::Bool(present))]);
        Ok(Response::new(Status::Ok, Some(value)))
    }

    async fn delete_node(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        self.storage.delete_node(db, path, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::ok())
    }

    async fn slice_dataset(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let key = request.kwarg("key").ok_or(Status::MissingArgument)?;
        let slice = args::as_slice(key).ok_or(Status::InvalidArgument)?;
        let array = self
            .storage
            .slice_dataset(db, path, &slice, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Ok, Some(Value::Array(array))))
    }

    async fn broadcast_dataset(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let key = request.kwarg("key").ok_or(Status::MissingArgument)?;
        let slice = args::as_slice(key).ok_or(Status::InvalidArgument)?;
        let data = request.data.as_ref().ok_or(Status::MissingData)?;
        match data {
            Value::Array(array) => {
                self.storage
                    .broadcast_dataset(db, path, &slice, array, holder)
                    .await
                    .map_err(|e| error::map_storage_error(&e))?;
            }
            scalar @ (Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
                self.storage
                    .broadcast_scalar(db, path, &slice, scalar, holder)
                    .await
                    .map_err(|e| error::map_storage_error(&e))?;
            }
            _ => return Err(Status::InvalidArgument),
        }
        Ok(Response::ok())
    }

    async fn attrs_get(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let key = request.kwarg("key").and_then(Value::as_str).ok_or(Status::MissingArgument)?;
        let value = self.storage.attrs_get(db, path, key, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::new(Status::Ok, Some(value)))
    }

    async fn attrs_set(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let key = request.kwarg("key").and_then(Value::as_str).ok_or(Status::MissingArgument)?;
        let value = request.data.as_ref().ok_or(Status::MissingData)?;
        self.storage.attrs_set(db, path, key, value, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::ok())
    }

    async fn attrs_contains(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let key = request.kwarg("key").and_then(Value::as_str).ok_or(Status::MissingArgument)?;
        let present = self
            .storage
            .attrs_contains(db, path, key, holder)
            .await
            .map_err(|e| error::map_storage_error(&e))?;
        let value = Value::Map(vec![("contains".to_owned(), Value::Bool(present))]);
        Ok(Response::new(Status::Ok, Some(value)))
    }

    async fn attrs_keys(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let keys = self.storage.attrs_keys(db, path, holder).await.map_err(|e| error::map_storage_error(&e))?;
        let value = Value::Map(vec![(
            "keys".to_owned(),
            Value::Tuple(keys.into_iter().map(Value::Str).collect()),
        )]);
        Ok(Response::new(Status::Ok, Some(value)))
    }

    async fn attrs_del(&self, request: &Request, holder: HolderId) -> Result<Response, Status> {
        let (db, path) = self.node_preamble(request, holder).await?;
        let key = request.kwarg("key").and_then(Value::as_str).ok_or(Status::MissingArgument)?;
        self.storage.attrs_del(db, path, key, holder).await.map_err(|e| error::map_storage_error(&e))?;
        Ok(Response::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echo_vault_proto::{ArrayValue, DType, SliceValue};
    use echo_vault_lock::Strategy;
    use tempfile::tempdir;

    fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempdir().unwrap();
        let dispatcher = Dispatcher::new(dir.path().to_path_buf(), LockService::new(Strategy::WriterPreference));
        (dir, dispatcher)
    }

    #[tokio::test]
    async fn create_and_use_scenario() {
        let (_dir, d) = dispatcher();
        let mut req = Request::new("create_db");
        req.database = Some("a.h5".to_owned());
        assert_eq!(d.dispatch(&req, 1).await.status, Status::Created);

        assert_eq!(d.dispatch(&req, 1).await.status, Status::FileExists);

        let mut use_req = Request::new("use_db");
        use_req.database = Some("a.h5".to_owned());
        assert_eq!(d.dispatch(&use_req, 1).await.status, Status::Ok);
    }

    #[tokio::test]
    async fn dataset_round_trip_scenario() {
        let (_dir, d) = dispatcher();
        let mut create_db = Request::new("create_db");
        create_db.database = Some("a.h5".to_owned());
        d.dispatch(&create_db, 1).await;

        let mut create_ds = Request::new("create_dataset");
        create_ds.database = Some("a.h5".to_owned());
        create_ds.path = Some("/d".to_owned());
        create_ds.data = Some(Value::Array(ArrayValue {
            dtype: DType::UInt8,
            shape: vec![2, 3],
            fortran_order: false,
            bytes: vec![1, 2, 3, 4, 5, 6],
        }));
        let resp = d.dispatch(&create_ds, 1).await;
        assert_eq!(resp.status, Status::Ok);
        assert!(matches!(resp.data, Some(Value::Node(_))));

        let mut slice_req = Request::new("slice_dataset");
        slice_req.database = Some("a.h5".to_owned());
        slice_req.path = Some("/d".to_owned());
        slice_req
            .kwargs
            .push(("key".to_owned(), Value::Tuple(vec![Value::Slice(SliceValue {
                start: Some(0),
                stop: Some(1),
                step: None,
            })])));
        let resp = d.dispatch(&slice_req, 1).await;
        assert_eq!(resp.status, Status::Ok);
        let Some(Value::Array(arr)) = resp.data else { panic!("expected array") };
        assert_eq!(arr.shape, vec![1, 3]);
        assert_eq!(arr.bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn broadcast_type_error_scenario() {
        let (_dir, d) = dispatcher();
        let mut create_db = Request::new("create_db");
        create_db.database = Some("a.h5".to_owned());
        d.dispatch(&create_db, 1).await;

        let mut create_ds = Request::new("create_dataset");
        create_ds.database = Some("a.h5".to_owned());
        create_ds.path = Some("/d".to_owned());
        create_ds.data = Some(Value::Array(ArrayValue {
            dtype: DType::UInt8,
            shape: vec![4],
            fortran_order: false,
            bytes: vec![1, 2, 3, 4],
        }));
        d.dispatch(&create_ds, 1).await;

        let mut broadcast = Request::new("broadcast_dataset");
        broadcast.database = Some("a.h5".to_owned());
        broadcast.path = Some("/d".to_owned());
        broadcast.kwargs.push((
            "key".to_owned(),
            Value::Tuple(vec![Value::Slice(SliceValue { start: Some(0), stop: Some(1), step: None })]),
        ));
        broadcast.data = Some(Value::Array(ArrayValue {
            dtype: DType::Float64,
            shape: vec![4],
            fortran_order: false,
            bytes: vec![0; 32],
        }));
        let resp = d.dispatch(&broadcast, 1).await;
        assert_eq!(resp.status, Status::TypeError);
    }

    #[tokio::test]
    async fn attribute_lifecycle_scenario() {
        let (_dir, d) = dispatcher();
        let mut create_db = Request::new("create_db");
        create_db.database = Some("a.h5".to_owned());
        d.dispatch(&create_db, 1).await;
        let mut create_ds = Request::new("create_dataset");
        create_ds.database = Some("a.h5".to_owned());
        create_ds.path = Some("/d".to_owned());
        create_ds.kwargs.push(("shape".to_owned(), Value::Tuple(vec![Value::Int(2)])));
        create_ds.kwargs.push(("dtype".to_owned(), Value::Str("int64".to_owned())));
        d.dispatch(&create_ds, 1).await;

        let mut set_req = Request::new("attrs_set");
        set_req.database = Some("a.h5".to_owned());
        set_req.path = Some("/d".to_owned());
        set_req.kwargs.push(("key".to_owned(), Value::Str("k".to_owned())));
        set_req.data = Some(Value::Str("v".to_owned()));
        assert_eq!(d.dispatch(&set_req, 1).await.status, Status::Ok);

        let mut get_req = Request::new("attrs_get");
        get_req.database = Some("a.h5".to_owned());
        get_req.path = Some("/d".to_owned());
        get_req.kwargs.push(("key".to_owned(), Value::Str("k".to_owned())));
        let resp = d.dispatch(&get_req, 1).await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.data, Some(Value::Str("v".to_owned())));

        let mut missing_req = Request::new("attrs_get");
        missing_req.database = Some("a.h5".to_owned());
        missing_req.path = Some("/d".to_owned());
        missing_req.kwargs.push(("key".to_owned(), Value::Str("missing".to_owned())));
        assert_eq!(d.dispatch(&missing_req, 1).await.status, Status::KeyError);

        let mut contains_req = Request::new("attrs_contains");
        contains_req.database = Some("a.h5".to_owned());
        contains_req.path = Some("/d".to_owned());
        contains_req.kwargs.push(("key".to_owned(), Value::Str("k".to_owned())));
        let resp = d.dispatch(&contains_req, 1).await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.data, Some(Value::Map(vec![("contains".to_owned(), Value::Bool(true))])));
    }

    #[tokio::test]
    async fn path_safety_scenario() {
        let (_dir, d) = dispatcher();
        let mut req = Request::new("create_db");
        req.database = Some("../escape.h5".to_owned());
        assert_eq!(d.dispatch(&req, 1).await.status, Status::InvalidArgument);
    }

    #[tokio::test]
    async fn node_level_command_on_missing_db_is_file_not_found() {
        let (_dir, d) = dispatcher();
        let mut req = Request::new("get_node");
        req.database = Some("nope.h5".to_owned());
        req.path = Some("/a".to_owned());
        assert_eq!(d.dispatch(&req, 1).await.status, Status::FileNotFound);
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let (_dir, d) = dispatcher();
        let req = Request::new("create_db");
        assert_eq!(d.dispatch(&req, 1).await.status, Status::MissingArgument);
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let (_dir, d) = dispatcher();
        let req = Request::new("levitate");
        assert_eq!(d.dispatch(&req, 1).await.status, Status::UnknownCommand);
    }

    #[tokio::test]
    async fn get_keys_on_a_dataset_is_invalid_argument() {
        let (_dir, d) = dispatcher();
        let mut create_db = Request::new("create_db");
        create_db.database = Some("a.h5".to_owned());
        d.dispatch(&create_db, 1).await;
        let mut create_ds = Request::new("create_dataset");
        create_ds.database = Some("a.h5".to_owned());
        create_ds.path = Some("/d".to_owned());
        create_ds.kwargs.push(("shape".to_owned(), Value::Tuple(vec![Value::Int(1)])));
        create_ds.kwargs.push(("dtype".to_owned(), Value::Str("int64".to_owned())));
        d.dispatch(&create_ds, 1).await;

        let mut keys_req = Request::new("get_keys");
        keys_req.database = Some("a.h5".to_owned());
        keys_req.path = Some("/d".to_owned());
        assert_eq!(d.dispatch(&keys_req, 1).await.status, Status::InvalidArgument);
    }

    #[tokio::test]
    async fn list_dbs_enumerates_created_files() {
        let (_dir, d) = dispatcher();
        let mut a = Request::new("create_db");
        a.database = Some("a.h5".to_owned());
        d.dispatch(&a, 1).await;
        let mut b = Request::new("create_db");
        b.database = Some("sub/b.h5".to_owned());
        d.dispatch(&b, 1).await;

        let resp = d.dispatch(&Request::new("list_dbs"), 1).await;
        assert_eq!(resp.status, Status::Ok);
        let Some(Value::Map(entries)) = resp.data else { panic!("expected map") };
        let Value::Tuple(names) = &entries[0].1 else { panic!("expected tuple") };
        assert_eq!(names.len(), 2);
    }
}
