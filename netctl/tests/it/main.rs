mod control;
mod report;

mod helpers {
    use std::{io, sync::Arc};

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use netctl::{
        server::{create_router, AppState},
        store::Store,
    };
    use netctl_tc::{
        CommandBuilder, Executor, NamespaceIdentity, Pid, Resolve, StatusCache, TcCommand,
        TrafficShaper,
    };
    use parking_lot::Mutex;
    use tower::ServiceExt;

    /// Every pid below 10000 lives in its own namespace, others do not exist.
    pub struct Namespaces;

    impl Resolve for Namespaces {
        fn resolve(&self, pid: Pid) -> netctl_tc::Result<NamespaceIdentity> {
            if pid == 0 || pid >= 10_000 {
                return Err(netctl_tc::Error::NamespaceUnresolvable {
                    pid,
                    source: io::ErrorKind::NotFound.into(),
                });
            }
            Ok(NamespaceIdentity::from_link_target(&format!("net:[{}]", 4026530000 + pid))
                .unwrap())
        }
    }

    /// Records commands instead of running them.
    #[derive(Default)]
    pub struct Recorder {
        pub commands: Mutex<Vec<(Pid, String)>>,
    }

    impl Executor for Recorder {
        fn run(&self, pid: Pid, commands: &[TcCommand]) -> netctl_tc::Result<()> {
            self.commands.lock().extend(commands.iter().map(|c| (pid, c.to_string())));
            Ok(())
        }
    }

    pub struct Harness {
        pub store: Arc<Store>,
        pub recorder: Arc<Recorder>,
        pub cache: Arc<StatusCache>,
        router: Router,
    }

    impl Harness {
        pub fn new() -> Self {
            let _ = tracing_subscriber::fmt::try_init();

            let store = Arc::new(Store::new());
            let recorder = Arc::new(Recorder::default());
            let cache = Arc::new(StatusCache::new());
            let shaper = Arc::new(TrafficShaper::with_parts(
                CommandBuilder::default(),
                Arc::new(Namespaces),
                recorder.clone(),
                Arc::clone(&cache),
            ));
            let router = create_router(Arc::new(AppState::new(store.clone(), shaper)));

            Self { store, recorder, cache, router }
        }

        pub async fn request(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice(&body).unwrap())
        }

        pub async fn control(&self, body: impl Into<Body>) -> (StatusCode, serde_json::Value) {
            let request = Request::post("/control")
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap();
            self.request(request).await
        }

        pub async fn report(&self) -> (StatusCode, serde_json::Value) {
            self.request(Request::get("/report").body(Body::empty()).unwrap()).await
        }
    }
}
