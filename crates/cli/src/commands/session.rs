//! Session commands.

#![allow(clippy::print_stdout)]

use atelier_client::AtelierClient;
use secrecy::SecretString;

use super::CliError;

/// Log in and report who is signed in.
pub async fn login(client: &AtelierClient, email: &str, password: String) -> Result<(), CliError> {
    let password = SecretString::from(password);
    let user = client.session().login(email, &password).await?;
    println!("Logged in as {} <{}> ({})", user.full_name(), user.email, user.role);
    Ok(())
}

/// Register an account.
pub async fn signup(
    client: &AtelierClient,
    first_name: &str,
    last_name: &str,
    email: &str,
    password: String,
) -> Result<(), CliError> {
    let user = client
        .session()
        .signup(first_name, last_name, email, SecretString::from(password))
        .await?;
    println!("Created account {} <{}>", user.full_name(), user.email);
    println!("Run `atelier login -e {}` to sign in", user.email);
    Ok(())
}

/// Log out everywhere.
pub async fn logout(client: &AtelierClient) {
    client.session().logout().await;
    println!("Logged out");
}

/// Print the signed-in user.
pub fn whoami(client: &AtelierClient) -> Result<(), CliError> {
    let session = client.session().session();
    match session.auth.user.as_ref().filter(|_| session.is_authenticated()) {
        Some(user) => {
            println!("{} <{}>", user.full_name(), user.email);
            println!("role: {}", user.role);
            println!("id:   {}", user.id);
            Ok(())
        }
        None => Err(atelier_client::session::AuthFailure::NotAuthenticated.into()),
    }
}

/// Rotate the token pair.
pub async fn refresh(client: &AtelierClient) -> Result<(), CliError> {
    client.session().refresh_access_token().await?;
    println!("Access token refreshed");
    Ok(())
}

/// Print session, cookie, cache and cart state.
pub async fn status(client: &AtelierClient) {
    let session = client.session();
    let state = session.session();
    let cookies = session.cookies();

    println!("authenticated: {}", state.is_authenticated());
    if let Some(user) = &state.auth.user {
        println!("user:          {} <{}>", user.full_name(), user.email);
    }
    println!("refresh token: {}", present(state.auth.refresh_token().is_some()));
    println!("auth cookie:   {}", present(cookies.read_auth_cookie().is_some()));
    println!(
        "role cookie:   {}",
        cookies.read_role_cookie().as_deref().unwrap_or("-")
    );
    println!("token cache:   {}", present(session.bearer().is_some()));
    println!("reconcile:     {:?}", session.reconcile().await);
    println!("cart sync:     {:?}", client.cart().state());
    println!(
        "guest cart:    {} item(s)",
        client.persistor().guest_cart().total_items()
    );
}

const fn present(value: bool) -> &'static str {
    if value { "present" } else { "absent" }
}
