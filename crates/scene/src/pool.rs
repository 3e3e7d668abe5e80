use std::sync::Arc;

use engine::Engine;
use runtime::Pool;
use tracing::{error, info};

use crate::error::SceneError;
use crate::lighting::Ephemeris;
use crate::park::SharedPark;
use crate::request::{RenderingRequest, RenderingResponse};
use crate::scene::{Scene, SceneSettings};

pub type ScenePool = Pool<Scene>;

/// Builds and makes `size` scenes over `park`. Nothing is pooled unless every
/// scene was made; the ones already built are closed on failure.
pub fn warm_up(
    engine: &Engine,
    park: &SharedPark,
    ephemeris: Arc<dyn Ephemeris>,
    settings: &SceneSettings,
    size: usize,
) -> Result<ScenePool, SceneError> {
    let mut scenes: Vec<Scene> = Vec::with_capacity(size);
    for _ in 0..size {
        let mut scene = Scene::new(
            engine.device(),
            park.clone(),
            ephemeris.clone(),
            settings.clone(),
        );
        if let Err(err) = scene.make() {
            scene.close();
            for mut built in scenes {
                built.close();
            }
            return Err(err);
        }
        scenes.push(scene);
    }
    info!(size, renderer = %settings.renderer, samples = settings.samples, "scene pool warmed up");
    Ok(Pool::new(scenes))
}

/// Checks a scene out and renders on the blocking thread pool, so the native
/// call never stalls the async workers. The scene goes back to the pool when
/// the render ends, whether it succeeded, failed or panicked.
pub async fn render_pooled(
    pool: &ScenePool,
    request: RenderingRequest,
) -> Result<RenderingResponse, SceneError> {
    let mut scene = pool.checkout().await?;
    let joined = tokio::task::spawn_blocking(move || scene.render(&request)).await;
    match joined {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "render worker failed");
            Err(SceneError::Worker(err.to_string()))
        }
    }
}

/// Waits for in-flight renders, closes every scene and then the park. The
/// engine itself is shut down by its owner afterwards.
pub async fn teardown(pool: &ScenePool, park: &SharedPark) {
    let scenes = pool.close().await;
    let count = scenes.len();
    for mut scene in scenes {
        scene.close();
    }
    park.write().close();
    info!(scenes = count, "scene pool torn down");
}

#[cfg(test)]
mod tests {
    use super::{render_pooled, teardown, warm_up};
    use crate::error::SceneError;
    use crate::lighting::{Ephemeris, LightKind, SolarEphemeris};
    use crate::park::tests::{demo_layout, temp_dir};
    use crate::park::{Park, SharedPark};
    use crate::request::RenderingRequest;
    use crate::scene::SceneSettings;
    use crate::tile::TileSpec;
    use engine::{Device, Engine, HeadlessDevice};
    use foundation::math::Vec3;
    use image::Rgba;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct Harness {
        headless: Arc<HeadlessDevice>,
        engine: Engine,
        park: SharedPark,
        root: PathBuf,
    }

    fn harness(label: &str) -> Harness {
        let root = temp_dir(&format!("pool_{label}"));
        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn Device> = headless.clone();
        let engine = Engine::init(device, &[]).unwrap();
        let mut park = Park::new(engine.device(), demo_layout(&root, &["a", "b"]));
        park.make().unwrap();
        Harness {
            headless,
            engine,
            park: park.shared(),
            root,
        }
    }

    /// Tile `k % 2` of 2 across, camera x of `10 * k`, so every response
    /// carries its own request's fingerprint.
    fn request(k: u32, observation: &str) -> RenderingRequest {
        RenderingRequest {
            width: 4,
            height: 2,
            row: TileSpec::whole(),
            col: TileSpec::new(k % 2, 2).unwrap(),
            position: Vec3::new(f64::from(10 * k), 0.0, 0.0),
            direction: Vec3::new(-1.0, 0.0, 0.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            observation: observation.to_string(),
            hour: 12.0,
            light: LightKind::Distant,
            samples: None,
        }
    }

    fn ephemeris() -> Arc<dyn Ephemeris> {
        Arc::new(SolarEphemeris)
    }

    fn fingerprint(k: u32) -> Rgba<u8> {
        let red = if k % 2 == 0 { 16 } else { 143 };
        Rgba([red, 64, (10 * k % 256) as u8, 255])
    }

    async fn finish(h: Harness, pool: super::ScenePool) {
        teardown(&pool, &h.park).await;
        assert!(pool.is_closed());
        assert_eq!(h.headless.live_objects(), 0);
        assert_eq!(h.headless.invalid_releases(), 0);
        h.engine.shutdown();
        assert_eq!(h.headless.shutdown_count(), 1);
        let _ = fs::remove_dir_all(&h.root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn burst_for_one_observation_swaps_once_without_cross_talk() {
        let h = harness("burst");
        let pool = warm_up(&h.engine, &h.park, ephemeris(), &SceneSettings::default(), 2)
            .unwrap();
        assert_eq!(h.park.read().bound_id(), Some("a"));

        let mut tasks = Vec::new();
        for k in 0..8 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let response = render_pooled(&pool, request(k, "b")).await;
                (k, response)
            }));
        }
        for task in tasks {
            let (k, response) = task.await.unwrap();
            let image = response.unwrap().image;
            assert_eq!(image.dimensions(), (4, 2));
            assert_eq!(image.get_pixel(0, 0), &fingerprint(k), "request {k}");
        }

        assert_eq!(h.park.read().rebuild_count(), 1);
        assert_eq!(h.park.read().bound_id(), Some("b"));
        assert_eq!(pool.available(), 2);
        assert_eq!(h.headless.frames_rendered(), 8);
        finish(h, pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_observations_leave_the_last_swap_bound() {
        let h = harness("race");
        let pool = warm_up(&h.engine, &h.park, ephemeris(), &SceneSettings::default(), 2)
            .unwrap();

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { render_pooled(&pool, request(0, "a")).await }
        });
        let second = tokio::spawn({
            let pool = pool.clone();
            async move { render_pooled(&pool, request(1, "b")).await }
        });
        assert_eq!(first.await.unwrap().unwrap().image.get_pixel(0, 0), &fingerprint(0));
        assert_eq!(second.await.unwrap().unwrap().image.get_pixel(0, 0), &fingerprint(1));

        // Either "a" rendered first and "b" swapped in once, or "b" swapped
        // in and "a" swapped back.
        let park = h.park.read();
        match park.rebuild_count() {
            1 => assert_eq!(park.bound_id(), Some("b")),
            2 => assert_eq!(park.bound_id(), Some("a")),
            other => panic!("unexpected rebuild count {other}"),
        }
        drop(park);
        finish(h, pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failing_renders_return_their_scene() {
        let h = harness("failing");
        let pool = warm_up(&h.engine, &h.park, ephemeris(), &SceneSettings::default(), 2)
            .unwrap();

        let mut tasks = Vec::new();
        for k in 0..6 {
            let pool = pool.clone();
            let observation = if k % 2 == 0 { "missing" } else { "a" };
            tasks.push(tokio::spawn(async move {
                render_pooled(&pool, request(k, observation)).await
            }));
        }
        let mut failures = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => {}
                Err(SceneError::UnknownObservation(id)) => {
                    assert_eq!(id, "missing");
                    failures += 1;
                }
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(failures, 3);
        assert_eq!(pool.available(), 2);
        assert_eq!(h.park.read().bound_id(), Some("a"));
        finish(h, pool).await;
    }

    #[tokio::test]
    async fn warm_up_failure_builds_nothing() {
        let h = harness("warmup");
        h.park.write().close();
        let result = warm_up(&h.engine, &h.park, ephemeris(), &SceneSettings::default(), 3);
        assert!(matches!(result, Err(SceneError::NotMade("park"))));
        assert_eq!(h.headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn closed_pools_refuse_renders() {
        let h = harness("closed");
        let pool = warm_up(&h.engine, &h.park, ephemeris(), &SceneSettings::default(), 1)
            .unwrap();
        let scenes = pool.close().await;
        assert_eq!(scenes.len(), 1);
        assert!(matches!(
            render_pooled(&pool, request(0, "a")).await,
            Err(SceneError::PoolClosed)
        ));
        for mut scene in scenes {
            scene.close();
        }
        h.park.write().close();
        assert_eq!(h.headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&h.root);
    }
}
