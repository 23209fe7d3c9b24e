//! OAuth2 credential subsystem.
//!
//! Covers the authorization-code grant (with optional PKCE), client
//! credentials, refresh tokens with single-flight semantics, the RFC 8628
//! device grant, and RFC 7662/7009 introspection and revocation. Pending
//! authorization state lives in a [`StateStore`]; granted tokens persist
//! through a [`TokenStorage`] behind the [`TokenManager`].

pub mod device;
pub mod flows;
pub mod introspection;
pub mod pkce;
pub mod state;
pub mod storage;
pub mod token_manager;
pub mod types;

pub use device::DeviceFlowConfig;
pub use flows::{
    AuthorizationUrl, AuthorizeRequest, AuthorizedCallback, CallbackParams,
    ClientCredentialsRequest, OAuthClient,
};
pub use introspection::Introspection;
pub use pkce::{PkceMethod, PkcePair};
pub use state::{MemoryStateStore, StateEntry, StateStore, DEFAULT_STATE_TTL};
pub use storage::{FileTokenStorage, MemoryTokenStorage, StoredToken, TokenStorage};
pub use token_manager::{TokenManager, TokenRefresher};
pub use types::{
    ClientAuthMethod, DeviceAuthorization, OAuthConfig, TokenBundle, TokenResponse,
    DEFAULT_REFRESH_THRESHOLD,
};
