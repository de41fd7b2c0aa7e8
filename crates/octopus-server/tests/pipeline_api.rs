//! End-to-end processing: upload IFC, create a version, watch the workers
//! carry it to Ready, stream the artifacts back.

mod common;

use common::{wait_for, TestApp, FAKE_WEXBIM_MAGIC, SAMPLE_IFC};
use serde_json::{json, Value};

struct Pipeline {
    app: TestApp,
    project_id: String,
    ifc_file_id: String,
    version_id: String,
}

async fn run_pipeline_to_ready() -> (Pipeline, Value) {
    let app = TestApp::spawn().await;
    let workspace = app.create_workspace("W").await;
    let project = app
        .create_project(workspace["id"].as_str().unwrap(), "P")
        .await;
    let project_id = project["id"].as_str().unwrap().to_string();

    let file = app
        .upload_file(&project_id, "SampleHouse.ifc", SAMPLE_IFC.as_bytes().to_vec())
        .await;
    let ifc_file_id = file["id"].as_str().unwrap().to_string();
    assert_eq!(file["category"], "ifc");

    let model = app
        .post_json(
            &format!("/api/v1/projects/{project_id}/models"),
            json!({ "name": "M" }),
            None,
        )
        .await;
    assert_eq!(model.status(), 201);
    let model: Value = model.json().await.unwrap();
    let model_id = model["id"].as_str().unwrap();

    let version = app
        .post_json(
            &format!("/api/v1/models/{model_id}/versions"),
            json!({ "ifc_file_id": ifc_file_id }),
            None,
        )
        .await;
    assert_eq!(version.status(), 201);
    let version: Value = version.json().await.unwrap();
    assert_eq!(version["version_number"], 1);
    assert_eq!(version["status"], "pending");
    let version_id = version["id"].as_str().unwrap().to_string();

    let ready = wait_for(|| async {
        let response = app
            .get(&format!("/api/v1/modelversions/{version_id}"), None)
            .await;
        let version: Value = response.json().await.ok()?;
        if version["status"] == "ready" {
            Some(version)
        } else {
            None
        }
    })
    .await;

    (
        Pipeline {
            app,
            project_id,
            ifc_file_id,
            version_id,
        },
        ready,
    )
}

#[tokio::test]
async fn full_pipeline_reaches_ready_with_both_artifacts() {
    let (pipeline, ready) = run_pipeline_to_ready().await;
    let app = &pipeline.app;

    let wexbim_id = ready["wex_bim_file_id"].as_str().unwrap();
    let properties_id = ready["properties_file_id"].as_str().unwrap();
    assert!(ready["processed_at"].is_string());

    // The WexBIM stream is the fake converter's deterministic output.
    let response = app
        .get(
            &format!("/api/v1/modelversions/{}/wexbim", pipeline.version_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response.bytes().await.unwrap();
    assert!(body.starts_with(FAKE_WEXBIM_MAGIC));
    assert_eq!(&body[FAKE_WEXBIM_MAGIC.len()..], SAMPLE_IFC.as_bytes());

    // Lineage: ifc -> wexbim (derived_from) and ifc -> properties.
    let links = app
        .get(
            &format!("/api/v1/files/{}/links", pipeline.ifc_file_id),
            None,
        )
        .await;
    let links: Value = links.json().await.unwrap();
    let links = links.as_array().unwrap();
    assert_eq!(links.len(), 2);
    let has = |link_type: &str, target: &str| {
        links.iter().any(|l| {
            l["link_type"] == link_type
                && l["source_file_id"] == pipeline.ifc_file_id.as_str()
                && l["target_file_id"] == target
        })
    };
    assert!(has("derived_from", wexbim_id));
    assert!(has("properties_of", properties_id));

    // Artifact rows are categorized and kinded.
    let artifacts = app
        .get(
            &format!(
                "/api/v1/projects/{}/files?kind=artifact",
                pipeline.project_id
            ),
            None,
        )
        .await;
    let artifacts: Value = artifacts.json().await.unwrap();
    assert_eq!(artifacts["total"], 2);
}

#[tokio::test]
async fn properties_endpoint_pages_extracted_elements() {
    let (pipeline, _) = run_pipeline_to_ready().await;
    let app = &pipeline.app;

    let response = app
        .get(
            &format!("/api/v1/modelversions/{}/properties", pipeline.version_id),
            None,
        )
        .await;
    assert_eq!(response.status(), 200);
    let page: Value = response.json().await.unwrap();
    // The storey and the wall.
    assert_eq!(page["total"], 2);

    let wall = page["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["typeName"] == "IfcWall")
        .expect("wall element");
    assert_eq!(wall["globalId"], "wall-guid");
    assert_eq!(wall["propertySets"][0]["name"], "Pset_WallCommon");
    assert_eq!(
        wall["propertySets"][0]["properties"][0]["valueType"],
        "boolean"
    );
    assert_eq!(wall["quantitySets"][0]["quantities"][0]["unit"], "m2");

    // Page size 1 slices the element list.
    let response = app
        .get(
            &format!(
                "/api/v1/modelversions/{}/properties?page=2&page_size=1",
                pipeline.version_id
            ),
            None,
        )
        .await;
    let page: Value = response.json().await.unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn artifacts_are_not_ready_before_processing() {
    // No workers: the version stays Pending and its jobs stay queued,
    // which is exactly the outbox guarantee.
    let app = TestApp::spawn_with(|config| config.processing.workers = 0).await;
    let workspace = app.create_workspace("W").await;
    let project = app
        .create_project(workspace["id"].as_str().unwrap(), "P")
        .await;
    let project_id = project["id"].as_str().unwrap();

    let file = app
        .upload_file(project_id, "SampleHouse.ifc", SAMPLE_IFC.as_bytes().to_vec())
        .await;
    let model = app
        .post_json(
            &format!("/api/v1/projects/{project_id}/models"),
            json!({ "name": "M" }),
            None,
        )
        .await;
    let model: Value = model.json().await.unwrap();
    let version = app
        .post_json(
            &format!("/api/v1/models/{}/versions", model["id"].as_str().unwrap()),
            json!({ "ifc_file_id": file["id"] }),
            None,
        )
        .await;
    let version: Value = version.json().await.unwrap();
    assert_eq!(version["status"], "pending");
    let version_id = version["id"].as_str().unwrap();

    // Both jobs were enqueued in the version's transaction.
    assert_eq!(app.queue.backlog().await.unwrap(), 2);

    // Artifact endpoints answer not_ready, distinct from unknown ids.
    let response = app
        .get(&format!("/api/v1/modelversions/{version_id}/wexbim"), None)
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_ready");

    let response = app
        .get(
            &format!("/api/v1/modelversions/{version_id}/properties"),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_ready");

    let response = app
        .get(
            &format!("/api/v1/modelversions/{}/wexbim", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn rerunning_jobs_is_idempotent() {
    let (pipeline, ready) = run_pipeline_to_ready().await;
    let app = &pipeline.app;

    // Redeliver both job types for the same version, as an at-least-once
    // queue is allowed to do.
    let payload = octopus_server::processing::ModelVersionJob::payload(
        uuid::Uuid::parse_str(&pipeline.version_id).unwrap(),
    );
    app.queue
        .enqueue(octopus_server::processing::JOB_CONVERT_WEXBIM, &payload)
        .await
        .unwrap();
    app.queue
        .enqueue(octopus_server::processing::JOB_EXTRACT_PROPERTIES, &payload)
        .await
        .unwrap();

    // Redeliveries drain without changing the version.
    wait_for(|| async {
        let backlog = app.queue.backlog().await.unwrap();
        if backlog == 0 {
            Some(())
        } else {
            None
        }
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let after = app
        .get(&format!("/api/v1/modelversions/{}", pipeline.version_id), None)
        .await;
    let after: Value = after.json().await.unwrap();
    assert_eq!(after["status"], "ready");
    assert_eq!(after["wex_bim_file_id"], ready["wex_bim_file_id"]);
    assert_eq!(after["properties_file_id"], ready["properties_file_id"]);
}

#[tokio::test]
async fn lineage_blocks_artifact_deletion_until_source_is_gone() {
    let (pipeline, ready) = run_pipeline_to_ready().await;
    let app = &pipeline.app;
    let wexbim_id = ready["wex_bim_file_id"].as_str().unwrap();

    // The artifact is the target of a live link: refused.
    let blocked = app
        .client
        .delete(app.url(&format!("/api/v1/files/{wexbim_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(blocked.status(), 409);

    // The source has no incoming links: soft delete goes through.
    let deleted = app
        .client
        .delete(app.url(&format!("/api/v1/files/{}", pipeline.ifc_file_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    // With the source gone its artifact becomes deletable.
    let unblocked = app
        .client
        .delete(app.url(&format!("/api/v1/files/{wexbim_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(unblocked.status(), 204);

    // Soft-deleted rows drop out of default listings but stay for admins.
    let listing = app
        .get(
            &format!("/api/v1/projects/{}/files", pipeline.project_id),
            None,
        )
        .await;
    let listing: Value = listing.json().await.unwrap();
    assert_eq!(listing["total"], 1); // only the properties artifact remains

    let listing = app
        .get(
            &format!(
                "/api/v1/projects/{}/files?include_deleted=true",
                pipeline.project_id
            ),
            None,
        )
        .await;
    let listing: Value = listing.json().await.unwrap();
    assert_eq!(listing["total"], 3);
}

#[tokio::test]
async fn version_numbers_increase_and_versions_list_descending() {
    let (pipeline, _) = run_pipeline_to_ready().await;
    let app = &pipeline.app;

    let model = app
        .get(&format!("/api/v1/modelversions/{}", pipeline.version_id), None)
        .await;
    let model: Value = model.json().await.unwrap();
    let model_id = model["model_id"].as_str().unwrap();

    let second = app
        .post_json(
            &format!("/api/v1/models/{model_id}/versions"),
            json!({ "ifc_file_id": pipeline.ifc_file_id }),
            None,
        )
        .await;
    assert_eq!(second.status(), 201);
    let second: Value = second.json().await.unwrap();
    assert_eq!(second["version_number"], 2);

    let listing = app
        .get(&format!("/api/v1/models/{model_id}/versions"), None)
        .await;
    let listing: Value = listing.json().await.unwrap();
    let numbers: Vec<i64> = listing["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["version_number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![2, 1]);

    // Referencing an artifact as the source is refused.
    let artifacts = app
        .get(
            &format!(
                "/api/v1/projects/{}/files?kind=artifact&category=wex_bim",
                pipeline.project_id
            ),
            None,
        )
        .await;
    let artifacts: Value = artifacts.json().await.unwrap();
    let artifact_id = artifacts["items"][0]["id"].as_str().unwrap();
    let refused = app
        .post_json(
            &format!("/api/v1/models/{model_id}/versions"),
            json!({ "ifc_file_id": artifact_id }),
            None,
        )
        .await;
    assert_eq!(refused.status(), 400);
}
