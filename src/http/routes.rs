use axum::Router;
use crate::app::AppContext;

/// Trait for composable route modules
///
/// Implement this trait to create modular, reusable route groups.
/// Each module can register its own routes and be composed into the main application.
///
/// # Example
///
/// ```ignore
/// struct RefundsModule;
///
/// impl RouteModule for RefundsModule {
///     fn routes(&self) -> Router<AppContext> {
///         Router::new()
///             .route("/refunds", post(create_refund))
///             .route("/refunds/{id}", get(get_refund))
///     }
///
///     fn prefix(&self) -> Option<&str> {
///         Some("/payments")
///     }
/// }
/// ```
pub trait RouteModule {
    /// Returns a router with all routes for this module
    ///
    /// The router should NOT have state applied; the App applies
    /// `AppContext` once every module is registered.
    fn routes(&self) -> Router<AppContext>
    where
        Self: Sized;

    /// Optional: specify a path prefix for all routes in this module
    fn prefix(&self) -> Option<&str> {
        None
    }

    /// Registers this module's routes into the application router
    fn register(self, router: Router<AppContext>) -> Router<AppContext>
    where
        Self: Sized,
    {
        let routes = self.routes();

        if let Some(prefix) = self.prefix() {
            router.nest(prefix, routes)
        } else {
            router.merge(routes)
        }
    }
}
