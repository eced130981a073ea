use std::sync::Arc;
use std::time::Duration;

use courier_auth::{AuthError, IdentityVerifier, JwtVerifier, StaticVerifier};
use courier_chats::UserId;
use courier_config::AuthConfig;

fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: "integration_secret_with_enough_entropy".into(),
        issuer: "courier".into(),
        audience: "courier-clients".into(),
        token_ttl_seconds: 3_600,
    }
}

#[tokio::test]
async fn config_built_verifier_round_trips_identity() {
    let verifier = JwtVerifier::from_config(&auth_config());
    let token = verifier.issue_token(&UserId::from("carol")).unwrap();

    let identity = verifier.verify(&token).await.unwrap();
    assert_eq!(identity, UserId::from("carol"));
}

#[tokio::test]
async fn expired_tokens_fail_verification() {
    // jsonwebtoken allows 60s of leeway by default, so push expiry well past it.
    let verifier = JwtVerifier::from_config(&auth_config()).with_duration(Duration::ZERO);
    let token = verifier.issue_token(&UserId::from("carol")).unwrap();
    let mut claims = verifier.decode_claims(&token).unwrap();
    claims.exp = claims.exp.saturating_sub(3_600);

    let stale = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(auth_config().jwt_secret.as_bytes()),
    )
    .unwrap();

    assert!(matches!(
        verifier.verify(&stale).await,
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn verifiers_are_usable_as_trait_objects() {
    let verifiers: Vec<Arc<dyn IdentityVerifier>> = vec![
        Arc::new(StaticVerifier::with_tokens([("dev", "dave")])),
        Arc::new(JwtVerifier::from_config(&auth_config())),
    ];

    assert_eq!(
        verifiers[0].verify("dev").await.unwrap(),
        UserId::from("dave")
    );
    assert!(verifiers[1].verify("dev").await.is_err());
}
