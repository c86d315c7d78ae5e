use crate::api::{
    error::ErrorBody,
    handlers::{account, health, token},
};
use utoipa::{
    openapi::{Contact, InfoBuilder, License},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        token::token,
        account::verify_token,
        account::loadin,
    ),
    components(schemas(
        ErrorBody,
        health::Health,
        token::TokenRequest,
        token::TokenResponse,
        token::RevokeResponse,
        account::LoadIn,
    )),
    tags(
        (name = "oauth2", description = "Token issuance, refresh and revocation"),
        (name = "account", description = "Routes behind session verification"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

/// `OpenAPI` document with Cargo metadata as its info block.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(non_empty(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = contact(env!("CARGO_PKG_AUTHORS"));
    info.license = non_empty(env!("CARGO_PKG_LICENSE")).map(|id| {
        let mut license = License::new(id);
        license.identifier = Some(id.to_string());
        license
    });

    doc.info = info;
    doc
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

/// First Cargo author, `Name <email>` or a bare name.
fn contact(authors: &str) -> Option<Contact> {
    let primary = non_empty(authors.split(':').next().unwrap_or_default())?;

    let (name, email) = match primary.split_once('<') {
        Some((name, email)) => (non_empty(name), non_empty(email.trim_end_matches('>'))),
        None => (Some(primary), None),
    };

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}
