//! Upload orchestration.
//!
//! [`ImportOrchestrator::submit_upload`] validates and stages a file set,
//! records an [`ExecutionRequest`] and enqueues the first step of the
//! handler's chain. The worker calls back through [`TaskHandlerContext`];
//! each step enqueues its successor, the last one completes the execution.
//! A failing step fails the whole execution and removes what it created.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use geonode_assets::{
    copy_assets_and_links, create_asset_and_link, AssetHandlerRegistry, NewAssetLink,
};
use geonode_core::models::{
    AssetLink, ExecutionRequest, ExecutionStatus, ExecutionStepPayload, HandlerKind, ImportAction,
    Resource, ResourceHandlerInfo, Task, TaskType, Upload, UploadState,
};
use geonode_core::{Config, TaskError, TaskResultExt};
use geonode_db::Repositories;
use geonode_storage::{
    remove_staging_folder, DataRetriever, DataRetrieverError, FileSource, RemoteOpener,
    StorageError, StorageManager,
};
use geonode_worker::{TaskFinishedSender, TaskHandlerContext, TaskQueue, WorkerHandle};

use crate::backend::SpatialBackend;
use crate::error::{UploadError, UploadResult};
use crate::handlers::{
    HandlerRegistry, ImportHandler, UploadFiles, BASE_FILE_KEY, COPY_DYNAMIC_MODEL,
    COPY_GEONODE_RESOURCE, COPY_RASTER_FILE, CREATE_GEONODE_RESOURCE, IMPORT_RESOURCE,
    PUBLISH_RESOURCE, START_COPY, START_IMPORT,
};
use crate::limits::UploadLimitValidator;

/// A file set submitted by a user.
#[derive(Debug)]
pub struct UploadRequest {
    pub user: String,
    pub action: ImportAction,
    /// Keyed by role: `base_file`, `dbf_file`, `shx_file`, ...
    pub files: BTreeMap<String, FileSource>,
    pub params: Value,
}

#[derive(Debug, Clone)]
pub struct SubmittedUpload {
    pub execution_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub handler: HandlerKind,
}

pub struct ImportOrchestrator {
    config: Config,
    repos: Repositories,
    storage: Arc<StorageManager>,
    handlers: HandlerRegistry,
    assets: Arc<AssetHandlerRegistry>,
    opener: RemoteOpener,
    queue: TaskQueue,
    backend: Arc<dyn SpatialBackend>,
    limits: UploadLimitValidator,
}

impl ImportOrchestrator {
    pub fn new(
        config: Config,
        repos: Repositories,
        storage: Arc<StorageManager>,
        assets: Arc<AssetHandlerRegistry>,
        opener: RemoteOpener,
        queue: TaskQueue,
        backend: Arc<dyn SpatialBackend>,
    ) -> Self {
        let limits = UploadLimitValidator::new(
            repos.limits.clone(),
            repos.executions.clone(),
            config.limits().clone(),
        );
        Self {
            config,
            repos,
            storage,
            handlers: HandlerRegistry::with_defaults(),
            assets,
            opener,
            queue,
            backend,
            limits,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn limits(&self) -> &UploadLimitValidator {
        &self.limits
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Start the worker pool on this orchestrator's queue. The pool holds the
    /// orchestrator weakly.
    pub fn start_worker(self: &Arc<Self>, finished_tx: Option<TaskFinishedSender>) -> WorkerHandle {
        let context: Arc<dyn TaskHandlerContext> = self.clone();
        self.queue.start_worker(Arc::downgrade(&context), finished_tx)
    }

    pub fn get_handler(&self, files: &UploadFiles) -> Option<Arc<dyn ImportHandler>> {
        self.handlers.get_handler(files)
    }

    pub async fn get_execution(&self, exec_id: Uuid) -> UploadResult<ExecutionRequest> {
        self.repos
            .executions
            .get(exec_id)
            .await?
            .ok_or(UploadError::ExecutionNotFound(exec_id))
    }

    /// Persist a new execution for `handler`'s `action` chain.
    pub async fn create_execution_request(
        &self,
        user: &str,
        action: ImportAction,
        handler: &dyn ImportHandler,
        input_params: Value,
        name: Option<String>,
    ) -> UploadResult<ExecutionRequest> {
        let steps = handler.tasks(action);
        let first = steps.first().copied().ok_or_else(|| UploadError::UnsupportedAction {
            handler: handler.kind().to_string(),
            action: action.to_string(),
        })?;
        let mut request = ExecutionRequest::new(user, action, first, input_params);
        request.name = name;
        request.handler = Some(handler.kind());
        request.tasks = steps.iter().map(|s| s.to_string()).collect();
        Ok(self.repos.executions.create(request).await?)
    }

    /// Validate, stage and enqueue an upload. Staged files are removed again
    /// if anything fails before the execution exists.
    #[tracing::instrument(skip(self, request), fields(user = %request.user, action = %request.action))]
    pub async fn submit_upload(&self, request: UploadRequest) -> UploadResult<SubmittedUpload> {
        let start = std::time::Instant::now();
        let UploadRequest {
            user,
            action,
            files,
            params,
        } = request;
        if !files.contains_key(BASE_FILE_KEY) {
            return Err(UploadError::InvalidParams("base_file is required".to_string()));
        }

        // Staging stops at the size limit instead of filling the disk first.
        let max_upload_size = self.limits.max_upload_size().await?;
        let mut retriever = DataRetriever::new(files, &self.config, self.opener.clone(), false)
            .await?
            .with_size_limit(Some(max_upload_size));
        retriever.clone_remote_files().await.map_err(|e| match e {
            DataRetrieverError::Storage(StorageError::SizeLimitExceeded { .. }) => {
                UploadLimitValidator::total_size_exceeded(max_upload_size)
            }
            other => other.into(),
        })?;
        let staged = retriever.into_staged()?;

        let mut sizes = Vec::with_capacity(staged.paths().len());
        for path in staged.paths().values() {
            sizes.push(tokio::fs::metadata(path).await?.len());
        }
        self.limits.validate_files_sum_of_sizes(&sizes).await?;

        let handler = self.get_handler(staged.paths()).ok_or_else(|| {
            let name = staged
                .base_file()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            UploadError::HandlerNotFound(name)
        })?;
        handler.is_valid(staged.paths(), &user, &self.limits).await?;
        if !handler.can_do(action) {
            return Err(UploadError::UnsupportedAction {
                handler: handler.kind().to_string(),
                action: action.to_string(),
            });
        }
        let params = handler.extract_params(&params, action)?;

        let base_name = staged
            .base_file()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let input_params = json!({
            "files": staged
                .paths()
                .iter()
                .map(|(k, p)| (k.clone(), p.to_string_lossy().into_owned()))
                .collect::<BTreeMap<_, _>>(),
            "temporary_folder": staged.folder().map(|f| f.to_string_lossy().into_owned()),
            "handler": handler.kind(),
            "params": params,
        });
        let execution = self
            .create_execution_request(
                &user,
                action,
                handler.as_ref(),
                input_params,
                Some(base_name.clone()),
            )
            .await?;
        // From here on set_as_failed owns the cleanup.
        let _ = staged.persist();

        let mut upload = Upload::new(&user, base_name);
        upload.state = UploadState::Running;
        upload.execution_id = Some(execution.exec_id);
        let upload = match self.repos.uploads.create(upload).await {
            Ok(upload) => upload,
            Err(e) => {
                self.set_as_failed(execution.exec_id, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        self.enqueue_first_step(&execution).await?;

        tracing::info!(
            execution_id = %execution.exec_id,
            upload_id = %upload.id,
            handler = %handler.kind(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload submitted"
        );
        Ok(SubmittedUpload {
            execution_id: execution.exec_id,
            upload_id: Some(upload.id),
            handler: handler.kind(),
        })
    }

    /// Start a copy of `resource_id` with the handler that imported it.
    #[tracing::instrument(skip(self, params))]
    pub async fn copy_resource(
        &self,
        user: &str,
        resource_id: Uuid,
        params: Value,
    ) -> UploadResult<SubmittedUpload> {
        let resource = self
            .repos
            .resources
            .get_resource(resource_id)
            .await?
            .ok_or(UploadError::ResourceNotFound(resource_id))?;
        let info = self
            .repos
            .handler_info
            .handler_info_for_resource(resource_id)
            .await?
            .ok_or_else(|| {
                UploadError::HandlerNotFound(format!("no import handler recorded for {}", resource_id))
            })?;
        let handler = self
            .handlers
            .get_by_kind(info.handler)
            .ok_or_else(|| UploadError::HandlerNotFound(info.handler.to_string()))?;

        self.limits.validate_parallelism_limit_per_user(user).await?;
        if !handler.can_do(ImportAction::Copy) {
            return Err(UploadError::UnsupportedAction {
                handler: handler.kind().to_string(),
                action: ImportAction::Copy.to_string(),
            });
        }

        let mut data = match params {
            Value::Object(map) => Value::Object(map),
            _ => json!({}),
        };
        data["resource_id"] = json!(resource_id.to_string());
        let params = handler.extract_params(&data, ImportAction::Copy)?;

        let input_params = json!({
            "resource_id": resource_id,
            "source_alternate": resource.alternate,
            "handler": handler.kind(),
            "params": params,
        });
        let execution = self
            .create_execution_request(
                user,
                ImportAction::Copy,
                handler.as_ref(),
                input_params,
                Some(resource.title.clone()),
            )
            .await?;
        self.enqueue_first_step(&execution).await?;

        Ok(SubmittedUpload {
            execution_id: execution.exec_id,
            upload_id: None,
            handler: handler.kind(),
        })
    }

    async fn enqueue_first_step(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let Some(step) = execution.tasks.first() else {
            return self.set_as_completed(execution.exec_id).await;
        };
        let payload = ExecutionStepPayload {
            execution_id: execution.exec_id,
            action: execution.action,
            step: step.clone(),
        };
        if let Err(e) = self.queue.submit(&payload).await {
            self.set_as_failed(execution.exec_id, &e.to_string()).await?;
            return Err(UploadError::Queue(e));
        }
        Ok(())
    }

    /// Enqueue the step after `step` in the execution's chain, or complete the
    /// execution when `step` was the last one.
    pub async fn perform_next_step(
        &self,
        exec_id: Uuid,
        action: ImportAction,
        step: &str,
    ) -> UploadResult<()> {
        let execution = self.get_execution(exec_id).await?;
        let position = execution
            .tasks
            .iter()
            .position(|s| s == step)
            .ok_or_else(|| UploadError::InvalidParams(format!("'{}' is not part of the chain", step)))?;

        match execution.tasks.get(position + 1) {
            Some(next) => {
                let payload = ExecutionStepPayload {
                    execution_id: exec_id,
                    action,
                    step: next.clone(),
                };
                self.queue.submit(&payload).await.map_err(UploadError::Queue)?;
                tracing::debug!(execution_id = %exec_id, step = %next, "Next step enqueued");
                Ok(())
            }
            None => self.set_as_completed(exec_id).await,
        }
    }

    pub async fn update_execution_request_status(
        &self,
        exec_id: Uuid,
        status: ExecutionStatus,
        step: Option<&str>,
        log: Option<String>,
    ) -> UploadResult<ExecutionRequest> {
        let mut execution = self.get_execution(exec_id).await?;
        execution.status = status;
        if let Some(step) = step {
            execution.step = Some(step.to_string());
        }
        if log.is_some() {
            execution.log = log;
        }
        execution.last_updated = Utc::now();
        Ok(self.repos.executions.update(execution).await?)
    }

    /// Fail the execution and release what it created: the staging folder,
    /// a resource created by this execution (with its assets and stored
    /// files), a created asset, and the upload session.
    #[tracing::instrument(skip(self))]
    pub async fn set_as_failed(&self, exec_id: Uuid, reason: &str) -> UploadResult<()> {
        let execution = self
            .update_execution_request_status(
                exec_id,
                ExecutionStatus::Failed,
                None,
                Some(reason.to_string()),
            )
            .await?;
        tracing::warn!(execution_id = %exec_id, reason = %reason, "Execution failed");

        self.release_staging_folder(&execution).await;

        if let Some(resource_id) = param_uuid(&execution.output_params, CREATED_RESOURCE_ID) {
            match self.delete_resource(resource_id).await {
                Ok(_) => tracing::info!(resource_id = %resource_id, "Created resource rolled back"),
                Err(e) => tracing::warn!(resource_id = %resource_id, error = %e, "Resource cleanup failed"),
            }
        }
        let cloned = execution.output_params["cloned_asset_ids"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|id| id.as_str().and_then(|id| Uuid::parse_str(id).ok()));
        let asset_ids: Vec<Uuid> = param_uuid(&execution.output_params, "asset_id")
            .into_iter()
            .chain(cloned)
            .collect();
        for asset_id in asset_ids {
            if let Err(e) = self.remove_asset(asset_id).await {
                tracing::warn!(asset_id = %asset_id, error = %e, "Asset cleanup failed");
            }
        }

        if let Some(mut upload) = self.repos.uploads.find_by_execution(exec_id).await? {
            upload.state = UploadState::Invalid;
            self.repos.uploads.update(upload).await?;
        }
        Ok(())
    }

    pub async fn set_as_completed(&self, exec_id: Uuid) -> UploadResult<()> {
        let execution = self
            .update_execution_request_status(exec_id, ExecutionStatus::Finished, None, None)
            .await?;
        if let Some(mut upload) = self.repos.uploads.find_by_execution(exec_id).await? {
            upload.state = UploadState::Processed;
            upload.complete = true;
            upload.resource_id = execution.resource_id;
            self.repos.uploads.update(upload).await?;
        }
        tracing::info!(execution_id = %exec_id, resource_id = ?execution.resource_id, "Execution completed");
        Ok(())
    }

    /// Remove a resource with its assets, links, handler record and
    /// published layer.
    #[tracing::instrument(skip(self))]
    pub async fn delete_resource(&self, resource_id: Uuid) -> UploadResult<bool> {
        let Some(resource) = self.repos.resources.get_resource(resource_id).await? else {
            return Ok(false);
        };
        if let Some(alternate) = &resource.alternate {
            self.backend
                .delete_resource(alternate)
                .await
                .map_err(UploadError::Backend)?;
        }
        for link in self.repos.links.links_for_resource(resource_id).await? {
            self.remove_asset(link.asset_id).await?;
        }
        self.delete_stored_files(&resource.files).await;
        self.repos.handler_info.delete_handler_info(resource_id).await?;
        Ok(self.repos.resources.delete_resource(resource_id).await?)
    }

    async fn delete_stored_files(&self, files: &[String]) {
        for file in files {
            if let Err(e) = self.storage.delete(file).await {
                tracing::warn!(file = %file, error = %e, "Stored resource file not removed");
            }
        }
    }

    async fn remove_asset(&self, asset_id: Uuid) -> UploadResult<()> {
        let Some(asset) = self.repos.assets.get(asset_id).await? else {
            return Ok(());
        };
        match self.assets.get_handler(&asset) {
            Some(handler) => handler.remove_data(&asset).await?,
            None => tracing::warn!(asset_id = %asset_id, "No asset handler, data left in place"),
        }
        self.repos.links.delete_links_for_asset(asset_id).await?;
        self.repos.assets.delete(asset_id).await?;
        Ok(())
    }

    async fn release_staging_folder(&self, execution: &ExecutionRequest) {
        let Some(folder) = execution.input_params["temporary_folder"].as_str() else {
            return;
        };
        if let Err(e) = remove_staging_folder(Path::new(folder), self.config.media_root()).await {
            tracing::warn!(folder = %folder, error = %e, "Staging folder cleanup failed");
        }
    }

    async fn merge_output(&self, exec_id: Uuid, values: Value) -> UploadResult<ExecutionRequest> {
        let mut execution = self.get_execution(exec_id).await?;
        if !execution.output_params.is_object() {
            execution.output_params = json!({});
        }
        if let Value::Object(values) = values {
            for (key, value) in values {
                execution.output_params[key.as_str()] = value;
            }
        }
        execution.last_updated = Utc::now();
        Ok(self.repos.executions.update(execution).await?)
    }

    /// Run one step and enqueue its successor.
    #[tracing::instrument(skip(self, payload), fields(execution_id = %payload.execution_id, step = %payload.step))]
    async fn execute_step(&self, payload: &ExecutionStepPayload) -> UploadResult<Value> {
        let start = std::time::Instant::now();
        let execution = self.get_execution(payload.execution_id).await?;
        if execution.status == ExecutionStatus::Failed {
            tracing::info!("Execution already failed, step skipped");
            return Ok(json!({"skipped": true}));
        }
        let execution = self
            .update_execution_request_status(
                execution.exec_id,
                ExecutionStatus::Running,
                Some(&payload.step),
                None,
            )
            .await?;

        match payload.step.as_str() {
            START_IMPORT | START_COPY => {}
            IMPORT_RESOURCE => self.import_resource(&execution).await?,
            PUBLISH_RESOURCE => self.publish_resource(&execution).await?,
            CREATE_GEONODE_RESOURCE => self.create_geonode_resource(&execution).await?,
            COPY_DYNAMIC_MODEL => self.copy_dynamic_model(&execution).await?,
            COPY_RASTER_FILE => self.copy_raster_file(&execution).await?,
            COPY_GEONODE_RESOURCE => self.copy_geonode_resource(&execution).await?,
            other => {
                return Err(UploadError::UnsupportedAction {
                    handler: execution_handler(&execution)?.to_string(),
                    action: other.to_string(),
                })
            }
        }

        self.perform_next_step(payload.execution_id, payload.action, &payload.step)
            .await?;
        tracing::debug!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Step finished"
        );
        Ok(json!({"execution_id": payload.execution_id, "step": payload.step}))
    }

    async fn import_resource(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let files = input_files(execution)?;
        let base_file = files
            .get(BASE_FILE_KEY)
            .ok_or_else(|| UploadError::InvalidParams("base_file is missing".to_string()))?;
        let imported = self
            .backend
            .import_resource(execution.exec_id, execution_handler(execution)?, base_file)
            .await
            .map_err(UploadError::Backend)?;
        if let Some(import_id) = imported.import_id {
            if let Some(mut upload) = self.repos.uploads.find_by_execution(execution.exec_id).await? {
                upload.import_id = Some(import_id);
                self.repos.uploads.update(upload).await?;
            }
            tracing::debug!(import_id, "Importer session recorded");
        }
        self.merge_output(execution.exec_id, json!({"alternate": imported.alternate}))
            .await?;
        Ok(())
    }

    async fn publish_resource(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let alternate = output_alternate(execution)?;
        self.backend
            .publish_resource(execution.exec_id, alternate)
            .await
            .map_err(UploadError::Backend)
    }

    /// Create the dataset, its stored spatial files, its original-files
    /// asset and the handler record, then drop the staging folder.
    ///
    /// With `overwrite_existing_layer` an existing resource of the same
    /// alternate has its files replaced instead; with `skip_existing_layers`
    /// it is reused untouched. Either way it must belong to the caller.
    async fn create_geonode_resource(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let files = input_files(execution)?;
        let handler = execution_handler(execution)?;
        let params = &execution.input_params["params"];
        let alternate = output_alternate(execution)?.to_string();
        let overwrite = params["overwrite_existing_layer"].as_bool().unwrap_or(false);
        let skip = params["skip_existing_layers"].as_bool().unwrap_or(false);
        let store_files = params["store_spatial_files"].as_bool().unwrap_or(true);

        let mut staged: Vec<PathBuf> = Vec::new();
        for path in files.values() {
            if !staged.contains(path) {
                staged.push(path.clone());
            }
        }

        if overwrite || skip {
            if let Some(existing) = self.repos.resources.find_by_alternate(&alternate).await? {
                if existing.owner != execution.user {
                    return Err(UploadError::NotResourceOwner {
                        resource_id: existing.id,
                    });
                }
                if overwrite {
                    self.overwrite_resource(execution, existing.clone(), &staged, store_files)
                        .await?;
                } else {
                    tracing::info!(resource_id = %existing.id, "Existing layer kept");
                }
                self.record_resource(execution, &existing, handler).await?;
                self.release_staging_folder(execution).await;
                return Ok(());
            }
        }

        let title = params["title"]
            .as_str()
            .map(str::to_string)
            .or_else(|| {
                files
                    .get(BASE_FILE_KEY)
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "dataset".to_string());

        let mut resource = Resource::dataset(title, &execution.user);
        resource.subtype = Some(subtype(handler).to_string());
        resource.alternate = Some(alternate);
        let mut resource = self.repos.resources.create_resource(resource).await?;
        self.merge_output(execution.exec_id, json!({ CREATED_RESOURCE_ID: resource.id }))
            .await?;

        if store_files {
            resource.files = self.store_resource_files(&resource, &staged).await?;
            let resource = self.repos.resources.update_resource(resource.clone()).await?;
            let (asset, _) = create_asset_and_link(
                &self.assets,
                &self.repos,
                &resource,
                None,
                NewAssetLink::new(&execution.user, staged),
            )
            .await?;
            self.merge_output(execution.exec_id, json!({"asset_id": asset.id}))
                .await?;
        }

        self.record_resource(execution, &resource, handler).await?;
        self.release_staging_folder(execution).await;
        Ok(())
    }

    /// Write staged files through the storage backend under
    /// `resources/<id>/`.
    async fn store_resource_files(
        &self,
        resource: &Resource,
        staged: &[PathBuf],
    ) -> UploadResult<Vec<String>> {
        let sources: Vec<String> = staged
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let dir = PathBuf::from(RESOURCES_DIR).join(resource.id.to_string());
        let stored = self.storage.copy_files_list(&sources, &dir).await?;
        tracing::debug!(resource_id = %resource.id, files = stored.len(), "Resource files stored");
        Ok(stored)
    }

    /// Supersede the files of `resource` with the staged ones. New files go
    /// into a fresh directory next to the old ones; the old files are removed
    /// once the resource points at the new set.
    async fn overwrite_resource(
        &self,
        execution: &ExecutionRequest,
        mut resource: Resource,
        staged: &[PathBuf],
        store_files: bool,
    ) -> UploadResult<()> {
        if !store_files {
            return Ok(());
        }
        let previous = std::mem::take(&mut resource.files);
        resource.files = if previous.is_empty() {
            self.store_resource_files(&resource, staged).await?
        } else {
            self.storage
                .replace(previous.clone(), staged.to_vec())
                .await?
                .into_vec()
        };
        let resource = self.repos.resources.update_resource(resource).await?;
        self.delete_stored_files(&previous).await;

        match geonode_assets::get_default_asset(&self.repos, resource.id).await? {
            Some(mut asset) => {
                let handler = self
                    .assets
                    .get_handler(&asset)
                    .ok_or(UploadError::Asset(geonode_assets::AssetError::HandlerNotFound(
                        asset.tag(),
                    )))?;
                handler.replace_data(&mut asset, staged).await?;
            }
            None => {
                create_asset_and_link(
                    &self.assets,
                    &self.repos,
                    &resource,
                    None,
                    NewAssetLink::new(&execution.user, staged.to_vec()),
                )
                .await?;
            }
        }
        tracing::info!(resource_id = %resource.id, files = resource.files.len(), "Resource overwritten");
        Ok(())
    }

    async fn copy_dynamic_model(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let source = execution.input_params["source_alternate"]
            .as_str()
            .ok_or_else(|| UploadError::InvalidParams("source_alternate is missing".to_string()))?;
        let alternate = self
            .backend
            .copy_dynamic_model(execution.exec_id, source)
            .await
            .map_err(UploadError::Backend)?;
        self.merge_output(execution.exec_id, json!({"alternate": alternate}))
            .await?;
        Ok(())
    }

    /// Rasters have no table to copy: clone the source's data asset instead.
    async fn copy_raster_file(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let source_id = param_uuid(&execution.input_params, "resource_id")
            .ok_or_else(|| UploadError::InvalidParams("resource_id is missing".to_string()))?;
        let asset = geonode_assets::get_default_asset(&self.repos, source_id)
            .await?
            .ok_or(UploadError::ResourceNotFound(source_id))?;
        let handler = self
            .assets
            .get_handler(&asset)
            .ok_or(UploadError::Asset(geonode_assets::AssetError::HandlerNotFound(
                asset.tag(),
            )))?;
        let clone = handler.clone_asset(&asset).await?;
        self.merge_output(execution.exec_id, json!({"asset_id": clone.id}))
            .await?;
        self.copy_dynamic_model(execution).await
    }

    async fn copy_geonode_resource(&self, execution: &ExecutionRequest) -> UploadResult<()> {
        let source_id = param_uuid(&execution.input_params, "resource_id")
            .ok_or_else(|| UploadError::InvalidParams("resource_id is missing".to_string()))?;
        let source = self
            .repos
            .resources
            .get_resource(source_id)
            .await?
            .ok_or(UploadError::ResourceNotFound(source_id))?;
        let handler = execution_handler(execution)?;

        let title = execution.input_params["params"]["title"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} - copy", source.title));
        let mut target = Resource::dataset(title, &execution.user);
        target.subtype = source.subtype.clone();
        target.alternate = Some(output_alternate(execution)?.to_string());
        let mut target = self.repos.resources.create_resource(target).await?;
        self.merge_output(execution.exec_id, json!({ CREATED_RESOURCE_ID: target.id }))
            .await?;
        if !source.files.is_empty() {
            target.files = self.storage.copy(source.files.clone()).await?.into_vec();
            target = self.repos.resources.update_resource(target).await?;
        }

        match param_uuid(&execution.output_params, "asset_id") {
            // Cloned by copy_raster_file.
            Some(asset_id) => {
                let asset = self
                    .repos
                    .assets
                    .get(asset_id)
                    .await?
                    .ok_or(UploadError::ResourceNotFound(asset_id))?;
                let url = self
                    .assets
                    .get_handler(&asset)
                    .map(|h| h.create_link_url(&asset));
                let mut link = AssetLink::data(target.id, asset.id);
                link.name = Some(asset.title.clone());
                link.url = url;
                self.repos.links.create_link(link).await?;
            }
            None => {
                let copied = copy_assets_and_links(&self.assets, &self.repos, &source, &target).await?;
                let ids: Vec<Uuid> = copied.iter().map(|(asset, _)| asset.id).collect();
                self.merge_output(execution.exec_id, json!({"cloned_asset_ids": ids}))
                    .await?;
            }
        }

        self.record_resource(execution, &target, handler).await
    }

    async fn record_resource(
        &self,
        execution: &ExecutionRequest,
        resource: &Resource,
        handler: HandlerKind,
    ) -> UploadResult<()> {
        self.repos
            .handler_info
            .upsert_handler_info(ResourceHandlerInfo {
                resource_id: resource.id,
                handler,
                execution_id: Some(execution.exec_id),
                kwargs: execution.input_params["params"].clone(),
            })
            .await?;

        let mut current = self
            .merge_output(execution.exec_id, json!({"resource_id": resource.id}))
            .await?;
        current.resource_id = Some(resource.id);
        self.repos.executions.update(current).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandlerContext for ImportOrchestrator {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> anyhow::Result<Value> {
        match task.task_type {
            TaskType::ExecutionStep => {
                let payload: ExecutionStepPayload = task
                    .try_payload_as()
                    .context("Invalid step payload")
                    .unrecoverable()?;

                match self.execute_step(&payload).await {
                    Ok(result) => Ok(result),
                    Err(err) => {
                        tracing::error!(
                            execution_id = %payload.execution_id,
                            step = %payload.step,
                            error = %err,
                            "Execution step failed"
                        );
                        if let Err(cleanup) =
                            self.set_as_failed(payload.execution_id, &err.to_string()).await
                        {
                            tracing::error!(
                                execution_id = %payload.execution_id,
                                error = %cleanup,
                                "Could not mark execution as failed"
                            );
                        }
                        Err(TaskError::unrecoverable(err).into())
                    }
                }
            }
        }
    }
}

/// Output key of a resource row created by the running execution. Set as
/// soon as the row exists so a failure later in the step removes it.
const CREATED_RESOURCE_ID: &str = "created_resource_id";

/// Storage directory of the files kept for each resource.
const RESOURCES_DIR: &str = "resources";

fn subtype(handler: HandlerKind) -> &'static str {
    if handler.is_raster() {
        "raster"
    } else {
        "vector"
    }
}

fn param_uuid(value: &Value, key: &str) -> Option<Uuid> {
    value[key].as_str().and_then(|s| s.parse().ok())
}

fn input_files(execution: &ExecutionRequest) -> UploadResult<UploadFiles> {
    serde_json::from_value(execution.input_params["files"].clone())
        .map_err(|e| UploadError::InvalidParams(format!("files: {}", e)))
}

fn execution_handler(execution: &ExecutionRequest) -> UploadResult<HandlerKind> {
    execution
        .handler
        .ok_or_else(|| UploadError::InvalidParams("execution has no handler".to_string()))
}

fn output_alternate(execution: &ExecutionRequest) -> UploadResult<&str> {
    execution.output_params["alternate"]
        .as_str()
        .ok_or_else(|| UploadError::InvalidParams("no alternate recorded yet".to_string()))
}
