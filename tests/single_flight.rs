// Coalescing, caching, serialization and timeout behaviour of the gateway service
#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use dendrite::{
        GatewayError, GatewayService, InboundRequest,
        config::{GatewayConfig, RoutingConfig},
        core::RoutingTarget,
        ports::{DispatchError, DispatchResult, Dispatcher, Fields, Payload},
    };
    use serde_json::{Value, json};

    /// Pipeline stand-in that records how often and how concurrently it runs.
    struct FakePipeline {
        delay: Duration,
        value: Value,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl FakePipeline {
        fn new(delay: Duration, value: Value) -> Arc<Self> {
            Self::failing(delay, value, 0)
        }

        fn failing(delay: Duration, value: Value, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                delay,
                value,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dispatcher for FakePipeline {
        async fn dispatch(&self, _target: &RoutingTarget, _payload: Payload) -> DispatchResult<Fields> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(DispatchError::domain("pipeline failed", "flaky upstream"));
            }

            let mut fields = Fields::new();
            fields.insert("result".into(), self.value.clone());
            Ok(fields)
        }
    }

    fn gateway(
        pipeline: &Arc<FakePipeline>,
        configure: impl FnOnce(&mut GatewayConfig),
    ) -> Arc<GatewayService> {
        let mut config = GatewayConfig::builder()
            .routing(RoutingConfig::Default {
                target: "worker".into(),
            })
            .build()
            .unwrap();
        configure(&mut config);
        Arc::new(GatewayService::new(Arc::new(config), pipeline.clone()).unwrap())
    }

    fn request(key: &str) -> InboundRequest {
        InboundRequest::get("/", Some(&format!("q={key}")))
    }

    async fn concurrently(
        gateway: &Arc<GatewayService>,
        keys: &[&str],
    ) -> Vec<Result<Arc<str>, GatewayError>> {
        let handles: Vec<_> = keys
            .iter()
            .map(|key| {
                let gateway = gateway.clone();
                let request = request(key);
                tokio::spawn(async move { gateway.handle(request).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_simultaneous_requests_share_one_computation() {
        let pipeline = FakePipeline::new(Duration::from_millis(500), json!("42"));
        let gateway = gateway(&pipeline, |config| config.cache = true);

        let start = Instant::now();
        let results = concurrently(&gateway, &["k"; 5]).await;
        let elapsed = start.elapsed();

        for result in results {
            assert_eq!(&*result.unwrap(), "42");
        }
        assert_eq!(pipeline.calls(), 1);
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");

        // Later request is served from the cache without a new computation
        let start = Instant::now();
        let cached = gateway.handle(request("k")).await.unwrap();
        assert_eq!(&*cached, "42");
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(pipeline.calls(), 1);
        assert_eq!(gateway.coordinator().in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flood_of_identical_requests_dispatches_once() {
        let pipeline = FakePipeline::new(Duration::from_millis(200), json!({"n": 1}));
        let gateway = gateway(&pipeline, |config| config.cache = true);

        let results = concurrently(&gateway, &["same"; 32]).await;

        assert!(results.iter().all(|r| r.as_deref() == Ok(r#"{"n":1}"#)));
        assert_eq!(pipeline.calls(), 1);
        assert_eq!(gateway.coordinator().stats().leaders(), 1);
        assert!(gateway.coordinator().stats().followers() >= 1);
        assert_eq!(gateway.coordinator().cache_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_without_cache_identical_requests_run_one_at_a_time() {
        let pipeline = FakePipeline::new(Duration::from_millis(50), json!("v"));
        let gateway = gateway(&pipeline, |config| config.cache = false);

        let results = concurrently(&gateway, &["k"; 4]).await;

        assert!(results.iter().all(|r| r.as_deref() == Ok("v")));
        assert_eq!(pipeline.calls(), 4);
        assert_eq!(pipeline.peak(), 1);
        assert_eq!(gateway.coordinator().cache_len(), 0);
        assert_eq!(gateway.coordinator().in_flight_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_distinct_keys_compute_in_parallel() {
        let pipeline = FakePipeline::new(Duration::from_millis(200), json!("v"));
        let gateway = gateway(&pipeline, |config| config.cache = true);

        concurrently(&gateway, &["a", "b", "c"]).await;

        assert_eq!(pipeline.calls(), 3);
        assert!(pipeline.peak() > 1);
        assert_eq!(gateway.coordinator().cache_len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failures_are_not_cached() {
        let pipeline = FakePipeline::failing(Duration::from_millis(10), json!("ok"), 1);
        let gateway = gateway(&pipeline, |config| config.cache = true);

        let err = gateway.handle(request("k")).await.unwrap_err();
        assert_eq!(err.exception(), "DomainFailure");
        assert_eq!(gateway.coordinator().cache_len(), 0);
        assert_eq!(gateway.coordinator().in_flight_count(), 0);

        let ok = gateway.handle(request("k")).await.unwrap();
        assert_eq!(&*ok, "ok");
        assert_eq!(pipeline.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_follower_retries_after_leader_failure() {
        let pipeline = FakePipeline::failing(Duration::from_millis(200), json!("ok"), 1);
        let gateway = gateway(&pipeline, |config| config.cache = true);

        let leader = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.handle(request("k")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let follower = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.handle(request("k")).await })
        };

        // The failure goes to the leader only; the follower runs its own attempt
        assert!(matches!(
            leader.await.unwrap(),
            Err(GatewayError::Dispatch(DispatchError::Domain { .. }))
        ));
        assert_eq!(&*follower.await.unwrap().unwrap(), "ok");
        assert_eq!(pipeline.calls(), 2);
        assert_eq!(pipeline.peak(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_serializes_all_requests() {
        let pipeline = FakePipeline::new(Duration::from_millis(30), json!("v"));
        let gateway = gateway(&pipeline, |config| config.queue = true);

        let results = concurrently(&gateway, &["a", "b", "c", "d"]).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(pipeline.calls(), 4);
        assert_eq!(pipeline.peak(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_disabled_allows_overlap() {
        let pipeline = FakePipeline::new(Duration::from_millis(100), json!("v"));
        let gateway = gateway(&pipeline, |config| config.queue = false);

        concurrently(&gateway, &["a", "b", "c", "d"]).await;

        assert!(pipeline.peak() > 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_detaches_computation_which_still_caches() {
        let pipeline = FakePipeline::new(Duration::from_millis(300), json!("42"));
        let gateway = gateway(&pipeline, |config| {
            config.cache = true;
            config.request_timeout = Some("100ms".into());
        });

        let err = gateway.handle(request("slow")).await.unwrap_err();
        assert_eq!(err, GatewayError::Timeout(Duration::from_millis(100)));
        assert_eq!(err.status().as_u16(), 504);

        // The computation keeps running and releases on its own
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(gateway.coordinator().in_flight_count(), 0);

        let cached = gateway.handle(request("slow")).await.unwrap();
        assert_eq!(&*cached, "42");
        assert_eq!(pipeline.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_follower_wait_is_bounded_by_timeout() {
        let pipeline = FakePipeline::new(Duration::from_millis(400), json!("v"));
        let gateway = gateway(&pipeline, |config| {
            config.request_timeout = Some("150ms".into());
        });

        let results = concurrently(&gateway, &["k", "k"]).await;

        for result in results {
            assert!(matches!(result, Err(GatewayError::Timeout(_))));
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(gateway.coordinator().in_flight_count(), 0);
        assert_eq!(pipeline.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_requests_leave_no_key_in_flight() {
        let pipeline = FakePipeline::new(Duration::from_millis(200), json!("v"));
        let gateway = gateway(&pipeline, |config| config.cache = true);

        // A disconnecting client drops its request future mid-flight.
        let leader = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.handle(request("k")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let follower = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.handle(request("k")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        follower.abort();

        // Requests cancelled at every possible point along the way
        for i in 0..100 {
            let _ = tokio::time::timeout(
                Duration::ZERO,
                gateway.handle(request(&format!("c{i}"))),
            )
            .await;
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(gateway.coordinator().in_flight_count(), 0);

        let later = tokio::time::timeout(Duration::from_secs(2), gateway.handle(request("c7")))
            .await
            .expect("key left stranded in flight");
        assert_eq!(&*later.unwrap(), "v");
        let cached = gateway.handle(request("k")).await.unwrap();
        assert_eq!(&*cached, "v");
    }
}
