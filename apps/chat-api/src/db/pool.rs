use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

pub type DbPool = Pool<AsyncPgConnection>;

/// Connections held open for the hub's store gateway.
const POOL_SIZE: usize = 20;

/// Create a Diesel async connection pool.
///
/// Building the pool does not open a connection; the first checkout does.
pub fn connect(database_url: &str) -> DbPool {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(POOL_SIZE)
        .build()
        .expect("failed to build connection pool");

    tracing::info!(max_size = POOL_SIZE, "database pool created");

    pool
}
