use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use esox_sessionpool::{SessionConfig, SessionError, SessionPool, SessionProvider};

struct NullProvider;

#[async_trait]
impl SessionProvider for NullProvider {
    type Session = ();

    async fn connect(&self, _: &str, _: u16) -> Result<(), SessionError> {
        Ok(())
    }

    async fn authenticate(&self, _: &(), _: &str, _: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn set_transfer_mode(&self, _: &(), _: bool) -> Result<(), SessionError> {
        Ok(())
    }

    async fn probe(&self, _: &()) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self, _: &(), _: bool) -> Result<(), SessionError> {
        Ok(())
    }

    fn is_connected(&self, _: &()) -> bool {
        true
    }
}

fn acquire_release(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let pool = SessionPool::new(NullProvider, SessionConfig::new("bench").with_max_connections(4));

    c.bench_function("acquire_release_warm", |b| {
        b.to_async(&runtime).iter(|| async {
            let session = pool.acquire().await.unwrap();
            pool.release(session);
        })
    });
}

criterion_group!(benches, acquire_release);
criterion_main!(benches);
