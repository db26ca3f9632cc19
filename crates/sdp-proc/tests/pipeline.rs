//! Pipeline end-to-end tests.
//!
//! Run against a live Postgres named by `SDP_TEST_DATABASE_URL` and skip
//! silently when it is unset. Conversion tools are stand-in shell scripts.

#![cfg(unix)]

use chrono::{TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sdp_core::metadata::Metadata;
use sdp_core::models::dataset::{datatypes, DatasetKind};
use sdp_core::models::job::{JobStatus, JobTask};
use sdp_core::store::{Store, TrashFilter};
use sdp_proc::converters::{ConverterRegistry, DicomConverter, KspaceConverter};
use sdp_proc::{pipeline, PipelineContext};

struct Harness {
    ctx: PipelineContext,
    _data: tempfile::TempDir,
    _physio: tempfile::TempDir,
}

async fn harness(name: &str) -> Option<Harness> {
    let url = match std::env::var("SDP_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("SDP_TEST_DATABASE_URL not set; skipping pipeline test");
            return None;
        }
    };

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect admin pool");
    let schema = format!("sdp_pipe_{name}");
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .execute(&admin)
        .await
        .expect("drop schema");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create schema");

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .after_connect(move |conn, _meta| {
            let schema = schema.clone();
            Box::pin(async move {
                sqlx::query(&format!("SET search_path TO {schema}"))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .expect("connect test pool");

    let store = Store::from_pool(pool);
    store.migrate().await.expect("run migrations");

    let data = tempfile::tempdir().expect("data root");
    let physio = tempfile::tempdir().expect("physio root");
    let ctx = PipelineContext {
        store,
        data_root: data.path().to_path_buf(),
        physio_root: physio.path().to_path_buf(),
        registry: ConverterRegistry::default(),
        tile_size: 8,
        viewer_script_url: "/static/pyramid.js".to_string(),
    };
    Some(Harness {
        ctx,
        _data: data,
        _physio: physio,
    })
}

fn md(datatype: &str, psd: &str) -> Metadata {
    Metadata {
        datatype: datatype.to_string(),
        group_name: "cni".into(),
        exp_name: "testexp".into(),
        subj_code: Some("s001".into()),
        subj_firstname: None,
        subj_lastname: None,
        exam_uid: "1.2.840.99".into(),
        exam_no: 9001,
        series_uid: "1.2.3".into(),
        series_no: 3,
        acq_no: 1,
        series_desc: "localizer".into(),
        psd_name: psd.to_string(),
        physio_flag: true,
        timestamp: Utc.with_ymd_and_hms(2012, 6, 1, 10, 30, 0).unwrap(),
        duration_secs: 300.0,
    }
}

/// Minimal uncompressed NIfTI-1 file: u8 voxels, little endian.
fn synthetic_nifti(shape: &[usize], fill: u8) -> Vec<u8> {
    let mut out = vec![0u8; 352];
    out[0..4].copy_from_slice(&348i32.to_le_bytes());
    out[40..42].copy_from_slice(&(shape.len() as i16).to_le_bytes());
    for (i, extent) in shape.iter().enumerate() {
        let off = 40 + 2 * (i + 1);
        out[off..off + 2].copy_from_slice(&(*extent as i16).to_le_bytes());
    }
    out[70..72].copy_from_slice(&2i16.to_le_bytes());
    out[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    out[344..348].copy_from_slice(b"n+1\0");
    let voxels: usize = shape.iter().product();
    out.extend(std::iter::repeat(fill).take(voxels));
    out
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

async fn seed_primary(ctx: &PipelineContext, md: &Metadata) -> (i64, i64) {
    let epoch = ctx.store.epoch_from_metadata(md).await.unwrap();
    let primary = ctx
        .store
        .create_dataset(
            &ctx.data_root,
            epoch.id,
            DatasetKind::Primary,
            &md.datatype,
            false,
        )
        .await
        .unwrap();
    fs::write(
        ctx.data_root.join(primary.relpath()).join("0001.dat"),
        b"instrument bytes",
    )
    .unwrap();
    (epoch.id, primary.id)
}

#[tokio::test]
async fn find_stage_registers_physio_recordings() {
    let Some(h) = harness("find").await else {
        return;
    };
    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(DicomConverter::new("true")));
    let ctx = PipelineContext { registry, ..h.ctx };

    let (epoch_id, _) = seed_primary(&ctx, &md(datatypes::DICOM, "epi")).await;
    for name in [
        "epi_20120601_103100.physio",
        "epi_20120601_103400.physio",
        "epi_20120601_110000.physio",
        "fse_20120601_103100.physio",
    ] {
        fs::write(ctx.physio_root.join(name), b"trace").unwrap();
    }

    ctx.store.create_job(epoch_id, JobTask::Find).await.unwrap();
    let job = ctx.store.claim_next(None).await.unwrap().unwrap();
    pipeline::run_job(&ctx, job.clone()).await;

    let done = ctx.store.job(job.id).await.unwrap();
    assert_eq!(done.status().unwrap(), JobStatus::Done);

    let datasets = ctx
        .store
        .datasets(epoch_id, TrashFilter::ShowAll)
        .await
        .unwrap();
    let physio: Vec<_> = datasets
        .iter()
        .filter(|d| d.datatype == datatypes::PHYSIO)
        .collect();
    assert_eq!(physio.len(), 1);
    assert_eq!(physio[0].kind, "secondary");
    assert_eq!(physio[0].file_cnt_act, 2);
    assert_eq!(physio[0].file_cnt_tgt, 2);
    let dir = ctx.data_root.join(physio[0].relpath());
    assert!(dir.join("epi_20120601_103100.physio").is_file());
    assert!(dir.join("epi_20120601_103400.physio").is_file());
}

#[tokio::test]
async fn proc_stage_generates_nifti_and_pyramid() {
    let Some(h) = harness("proc").await else {
        return;
    };

    let fixtures = tempfile::tempdir().unwrap();
    let nifti_path = fixtures.path().join("fixture.nii");
    fs::write(&nifti_path, synthetic_nifti(&[8, 8, 2], 100)).unwrap();
    let script = write_script(
        fixtures.path(),
        "fake_dcm2nii",
        &format!("cp {} \"$2.nii\"", nifti_path.display()),
    );

    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(DicomConverter::new(
        script.to_str().unwrap(),
    )));
    let ctx = PipelineContext { registry, ..h.ctx };

    let (epoch_id, primary_id) = seed_primary(&ctx, &md(datatypes::DICOM, "epi")).await;
    ctx.store.create_job(epoch_id, JobTask::Proc).await.unwrap();
    let job = ctx.store.claim_next(None).await.unwrap().unwrap();
    pipeline::run_job(&ctx, job.clone()).await;

    let done = ctx.store.job(job.id).await.unwrap();
    assert_eq!(done.status().unwrap(), JobStatus::Done);

    let datasets = ctx
        .store
        .datasets(epoch_id, TrashFilter::ShowAll)
        .await
        .unwrap();
    let nifti = datasets
        .iter()
        .find(|d| d.datatype == datatypes::NIFTI_RAW)
        .expect("derived NIfTI dataset");
    assert_eq!(nifti.kind, "derived");
    assert_eq!(nifti.file_cnt_act, 1);
    let parents = ctx.store.dataset_parents(nifti.id).await.unwrap();
    assert_eq!(parents.iter().map(|d| d.id).collect::<Vec<_>>(), vec![primary_id]);

    let pyramid = datasets
        .iter()
        .find(|d| d.datatype == datatypes::IMAGE_PYRAMID)
        .expect("image pyramid dataset");
    let dir = ctx.data_root.join(pyramid.relpath());
    assert!(dir.join("index.html").is_file());
    assert!(dir.join("000_000_000.jpg").is_file());
    let parents = ctx.store.dataset_parents(pyramid.id).await.unwrap();
    assert_eq!(parents.iter().map(|d| d.id).collect::<Vec<_>>(), vec![nifti.id]);
}

#[tokio::test]
async fn proc_with_no_conversion_output_completes() {
    let Some(h) = harness("noout").await else {
        return;
    };

    let fixtures = tempfile::tempdir().unwrap();
    // Exits clean without writing anything into the output directory.
    let script = write_script(fixtures.path(), "silent_tool", "exit 0");

    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(DicomConverter::new(
        script.to_str().unwrap(),
    )));
    let ctx = PipelineContext { registry, ..h.ctx };

    let (epoch_id, _) = seed_primary(&ctx, &md(datatypes::DICOM, "epi")).await;
    ctx.store.create_job(epoch_id, JobTask::Proc).await.unwrap();
    let job = ctx.store.claim_next(None).await.unwrap().unwrap();
    pipeline::run_job(&ctx, job.clone()).await;

    let done = ctx.store.job(job.id).await.unwrap();
    assert_eq!(done.status().unwrap(), JobStatus::Done);

    let datasets = ctx
        .store
        .datasets(epoch_id, TrashFilter::ShowAll)
        .await
        .unwrap();
    assert!(
        datasets.iter().all(|d| d.kind == "primary"),
        "no derived datasets expected"
    );
}

#[tokio::test]
async fn kspace_recon_for_spiral_protocols() {
    let Some(h) = harness("kspace").await else {
        return;
    };

    let fixtures = tempfile::tempdir().unwrap();
    let nifti_path = fixtures.path().join("fixture.nii");
    fs::write(&nifti_path, synthetic_nifti(&[8, 8, 2], 100)).unwrap();
    let script = write_script(
        fixtures.path(),
        "fake_recon",
        &format!("cp {} \"$2.nii\"", nifti_path.display()),
    );

    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(KspaceConverter::new(
        script.to_str().unwrap(),
    )));
    let ctx = PipelineContext { registry, ..h.ctx };

    let (epoch_id, primary_id) = seed_primary(&ctx, &md(datatypes::KSPACE, "sprtio")).await;
    ctx.store.create_job(epoch_id, JobTask::Proc).await.unwrap();
    let job = ctx.store.claim_next(None).await.unwrap().unwrap();
    pipeline::run_job(&ctx, job.clone()).await;

    let done = ctx.store.job(job.id).await.unwrap();
    assert_eq!(done.status().unwrap(), JobStatus::Done);

    let datasets = ctx
        .store
        .datasets(epoch_id, TrashFilter::ShowAll)
        .await
        .unwrap();
    let nifti = datasets
        .iter()
        .find(|d| d.datatype == datatypes::NIFTI_RAW)
        .expect("derived NIfTI dataset");
    assert_eq!(nifti.kind, "derived");
    assert_eq!(nifti.file_cnt_act, 1);
    let parents = ctx.store.dataset_parents(nifti.id).await.unwrap();
    assert_eq!(parents.iter().map(|d| d.id).collect::<Vec<_>>(), vec![primary_id]);
    // Reconstruction yields a volume only, no pyramid.
    assert!(datasets
        .iter()
        .all(|d| d.datatype != datatypes::IMAGE_PYRAMID));
}

#[tokio::test]
async fn kspace_ignores_other_protocols() {
    let Some(h) = harness("kspace_noop").await else {
        return;
    };

    // The command would fail if it ever ran; non-spiral protocols must not
    // invoke it.
    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(KspaceConverter::new("false")));
    let ctx = PipelineContext { registry, ..h.ctx };

    let (epoch_id, _) = seed_primary(&ctx, &md(datatypes::KSPACE, "epi")).await;
    ctx.store.create_job(epoch_id, JobTask::Proc).await.unwrap();
    let job = ctx.store.claim_next(None).await.unwrap().unwrap();
    pipeline::run_job(&ctx, job.clone()).await;

    let done = ctx.store.job(job.id).await.unwrap();
    assert_eq!(done.status().unwrap(), JobStatus::Done);

    let datasets = ctx
        .store
        .datasets(epoch_id, TrashFilter::ShowAll)
        .await
        .unwrap();
    assert!(
        datasets.iter().all(|d| d.kind == "primary"),
        "no derived datasets expected"
    );
}

#[tokio::test]
async fn failed_conversion_marks_job_failed() {
    let Some(h) = harness("fail").await else {
        return;
    };

    let fixtures = tempfile::tempdir().unwrap();
    let script = write_script(fixtures.path(), "broken_tool", "echo conversion blew up >&2; exit 1");

    let mut registry = ConverterRegistry::new();
    registry.register(Arc::new(DicomConverter::new(
        script.to_str().unwrap(),
    )));
    let ctx = PipelineContext { registry, ..h.ctx };

    let (epoch_id, _) = seed_primary(&ctx, &md(datatypes::DICOM, "epi")).await;
    ctx.store.create_job(epoch_id, JobTask::Proc).await.unwrap();
    let job = ctx.store.claim_next(None).await.unwrap().unwrap();
    pipeline::run_job(&ctx, job.clone()).await;

    let failed = ctx.store.job(job.id).await.unwrap();
    assert_eq!(failed.status().unwrap(), JobStatus::Failed);
    let activity = failed.activity.as_deref().unwrap();
    assert!(activity.starts_with("failed:"), "activity: {activity}");
    assert!(activity.contains("conversion blew up"), "activity: {activity}");
}
