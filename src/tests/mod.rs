//! Shared test fixtures and end-to-end router tests.

mod saml_e2e;
