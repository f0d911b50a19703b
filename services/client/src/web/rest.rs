//! services/client/src/web/rest.rs
//!
//! The master definition for the OpenAPI description of the callback server.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::callback::auth_callback_handler,
        crate::web::callback::login_redirect_handler,
    ),
    tags(
        (name = "Study Assistant Auth", description = "Redirect endpoints of the browser sign-in flow.")
    )
)]
pub struct ApiDoc;
