//! Offloading of CPU-heavy cryptography.
//!
//! Protocol code never calls signing, blinding or derivation primitives
//! directly. It sends a [`CryptoRequest`] to a [`CryptoWorker`] and awaits the
//! [`CryptoResponse`]. Three workers exist:
//! - [`InlineWorker`]: runs the request on the calling task.
//! - [`PoolWorker`]: runs it on a rayon thread pool.
//! - [`SubprocessWorker`]: ships it to a child process over stdio.

pub mod envelope;
pub mod request;
mod subprocess;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use taler_network::wire::{DenominationInfo, SignKeyInfo};
use taler_types::{
    DenomSignature, EddsaPrivateKey, EddsaPublicKey, EddsaSignature, HashCode, Timestamp,
};

pub use envelope::{encode_request, handle_message, serve, ResponseEnvelope};
pub use request::{
    handle_request, CryptoRequest, CryptoResponse, DenominationCheck, DepositConfirmationCheck,
    DepositSignRequest, KeySetCheck, MeltConfirmationCheck, PlanchetRequest, PlanchetResult,
    RecoupSignRequest, RefreshPlanchet, RefreshSessionRequest, RefreshSessionResult,
    SigningKeyCheck, UnblindRequest,
};
pub use subprocess::SubprocessWorker;

use crate::config::{CryptoWorkerKind, WalletConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoWorkerError {
    #[error("{operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },

    #[error("crypto worker unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected {actual} response to {operation}")]
    UnexpectedResponse {
        operation: &'static str,
        actual: &'static str,
    },
}

#[async_trait]
pub trait CryptoWorker: Send + Sync {
    async fn execute(&self, request: CryptoRequest) -> Result<CryptoResponse, CryptoWorkerError>;
}

/// Build the worker selected by the configuration.
pub fn from_config(config: &WalletConfig) -> Result<Arc<dyn CryptoWorker>, CryptoWorkerError> {
    Ok(match config.crypto_worker {
        CryptoWorkerKind::Inline => Arc::new(InlineWorker),
        CryptoWorkerKind::Pool => Arc::new(PoolWorker::new(config.crypto_threads)?),
        CryptoWorkerKind::Subprocess => {
            let program = match &config.crypto_worker_program {
                Some(p) => p.clone(),
                None => std::env::current_exe()
                    .map_err(|e| CryptoWorkerError::Unavailable(e.to_string()))?,
            };
            Arc::new(SubprocessWorker::new(program, vec!["crypto-worker".into()]))
        }
    })
}

fn run(request: CryptoRequest) -> Result<CryptoResponse, CryptoWorkerError> {
    let operation = request.operation();
    handle_request(request).map_err(|e| CryptoWorkerError::Operation {
        operation,
        reason: e.to_string(),
    })
}

/// Executes requests on the calling task.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineWorker;

#[async_trait]
impl CryptoWorker for InlineWorker {
    async fn execute(&self, request: CryptoRequest) -> Result<CryptoResponse, CryptoWorkerError> {
        run(request)
    }
}

/// Executes requests on a dedicated rayon pool so the async runtime's threads
/// stay free.
pub struct PoolWorker {
    pool: rayon::ThreadPool,
}

impl PoolWorker {
    pub fn new(threads: usize) -> Result<Self, CryptoWorkerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("taler-crypto-{i}"))
            .build()
            .map_err(|e| CryptoWorkerError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl CryptoWorker for PoolWorker {
    async fn execute(&self, request: CryptoRequest) -> Result<CryptoResponse, CryptoWorkerError> {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(run(request));
        });
        rx.await
            .map_err(|_| CryptoWorkerError::Unavailable("crypto pool dropped the request".into()))?
    }
}

fn unexpected(operation: &'static str, actual: &CryptoResponse) -> CryptoWorkerError {
    CryptoWorkerError::UnexpectedResponse {
        operation,
        actual: actual.kind(),
    }
}

/// Typed front-ends for the individual requests.
impl<'a> dyn CryptoWorker + 'a {
    pub async fn create_planchet(
        &self,
        request: PlanchetRequest,
    ) -> Result<PlanchetResult, CryptoWorkerError> {
        match self.execute(CryptoRequest::CreatePlanchet(request)).await? {
            CryptoResponse::Planchet(p) => Ok(p),
            other => Err(unexpected("createPlanchet", &other)),
        }
    }

    pub async fn unblind_and_verify(
        &self,
        request: UnblindRequest,
    ) -> Result<DenomSignature, CryptoWorkerError> {
        match self.execute(CryptoRequest::UnblindAndVerify(request)).await? {
            CryptoResponse::DenomSignature(s) => Ok(s),
            other => Err(unexpected("unblindAndVerify", &other)),
        }
    }

    pub async fn sign_deposit(
        &self,
        request: DepositSignRequest,
    ) -> Result<EddsaSignature, CryptoWorkerError> {
        match self.execute(CryptoRequest::SignDeposit(request)).await? {
            CryptoResponse::Signature(s) => Ok(s),
            other => Err(unexpected("signDeposit", &other)),
        }
    }

    pub async fn derive_refresh_session(
        &self,
        request: RefreshSessionRequest,
    ) -> Result<RefreshSessionResult, CryptoWorkerError> {
        match self.execute(CryptoRequest::DeriveRefreshSession(request)).await? {
            CryptoResponse::RefreshSession(s) => Ok(s),
            other => Err(unexpected("deriveRefreshSession", &other)),
        }
    }

    pub async fn sign_recoup(
        &self,
        request: RecoupSignRequest,
    ) -> Result<EddsaSignature, CryptoWorkerError> {
        match self.execute(CryptoRequest::SignRecoup(request)).await? {
            CryptoResponse::Signature(s) => Ok(s),
            other => Err(unexpected("signRecoup", &other)),
        }
    }

    pub async fn is_valid_denomination(
        &self,
        master_pub: EddsaPublicKey,
        denom: DenominationInfo,
    ) -> Result<bool, CryptoWorkerError> {
        let request = CryptoRequest::IsValidDenomination(DenominationCheck { master_pub, denom });
        self.expect_valid("isValidDenomination", request).await
    }

    pub async fn is_valid_key_set(
        &self,
        list_issue_date: Timestamp,
        denom_pub_hashes: Vec<HashCode>,
        signkey_pub: EddsaPublicKey,
        sig: EddsaSignature,
    ) -> Result<bool, CryptoWorkerError> {
        let request = CryptoRequest::IsValidKeySet(KeySetCheck {
            list_issue_date,
            denom_pub_hashes,
            signkey_pub,
            sig,
        });
        self.expect_valid("isValidKeySet", request).await
    }

    pub async fn is_valid_signing_key(
        &self,
        master_pub: EddsaPublicKey,
        key: SignKeyInfo,
    ) -> Result<bool, CryptoWorkerError> {
        let request = CryptoRequest::IsValidSigningKey(SigningKeyCheck { master_pub, key });
        self.expect_valid("isValidSigningKey", request).await
    }

    pub async fn is_valid_melt_confirmation(
        &self,
        check: MeltConfirmationCheck,
    ) -> Result<bool, CryptoWorkerError> {
        let request = CryptoRequest::IsValidMeltConfirmation(check);
        self.expect_valid("isValidMeltConfirmation", request).await
    }

    pub async fn is_valid_deposit_confirmation(
        &self,
        check: DepositConfirmationCheck,
    ) -> Result<bool, CryptoWorkerError> {
        let request = CryptoRequest::IsValidDepositConfirmation(check);
        self.expect_valid("isValidDepositConfirmation", request).await
    }

    pub async fn hash_string(&self, value: String) -> Result<HashCode, CryptoWorkerError> {
        match self.execute(CryptoRequest::HashString { value }).await? {
            CryptoResponse::Hash(h) => Ok(h),
            other => Err(unexpected("hashString", &other)),
        }
    }

    pub async fn create_eddsa_keypair(
        &self,
    ) -> Result<(EddsaPublicKey, EddsaPrivateKey), CryptoWorkerError> {
        match self.execute(CryptoRequest::CreateEddsaKeypair {}).await? {
            CryptoResponse::Keypair { public, private } => Ok((public, private)),
            other => Err(unexpected("createEddsaKeypair", &other)),
        }
    }

    async fn expect_valid(
        &self,
        operation: &'static str,
        request: CryptoRequest,
    ) -> Result<bool, CryptoWorkerError> {
        match self.execute(request).await? {
            CryptoResponse::Valid(v) => Ok(v),
            other => Err(unexpected(operation, &other)),
        }
    }
}
