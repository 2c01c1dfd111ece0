//! An in-process exchange and test bank.
//!
//! [`FakeExchange`] implements [`HttpClient`] and answers the exchange
//! endpoints the wallet uses plus the bank's `/admin/add-incoming`. It signs
//! everything with real keys and checks every signature it receives, so a
//! wallet talking to it exercises the same code paths as against a real
//! exchange. State lives in memory and can be inspected and manipulated by
//! tests (revoke a denomination, go offline, inject server errors).
//!
//! Side-effecting requests are idempotent the way the real exchange's are:
//! a repeated withdrawal of the same planchet returns the stored signature, a
//! repeated melt with the same commitment returns the same `noreveal_index`,
//! a repeated deposit for the same contract returns the stored confirmation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use taler_crypto::purpose::{self, DenominationValidity, DepositSignInput};
use taler_crypto::{
    blind, coin_ev_hash, denom_keypair_from_seed, derive_refresh_planchets,
    ecdhe_public_from_private, eddsa_keypair_from_seed, kdf32, refresh_commitment, sha512,
    sign_blinded, verify_denom_signature, wire_hash, DenomKeyPair, EddsaKeyPair,
};
use taler_network::wire::{
    codes, AddIncomingRequest, AddIncomingResponse, AuditorEntry, DenominationInfo,
    DepositRequest, DepositResponse, ErrorResponse, KeysResponse, MeltRequest, MeltResponse,
    RecoupEntry, RecoupRequest, RecoupResponse, ReserveStatusResponse, RevealRequest,
    RevealResponse, SignKeyInfo, WithdrawRequest, WithdrawResponse,
};
use taler_network::{HttpClient, HttpResponse, NetworkError};
use taler_types::{
    Amount, AmountError, BlindedPlanchet, BlindedSignature, Clock, EddsaPublicKey,
    EddsaSignature, HashCode, Timestamp,
};
use tracing::debug;

const YEAR_SECS: u64 = 365 * 24 * 3600;

/// One denomination offered by the fake exchange.
#[derive(Clone, Debug)]
pub struct DenomSpec {
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub fee_deposit: Amount,
    pub fee_refresh: Amount,
    pub fee_refund: Amount,
    /// Seconds from creation until withdrawal stops.
    pub withdraw_secs: u64,
    pub deposit_secs: u64,
    pub legal_secs: u64,
}

impl DenomSpec {
    /// A fee-free denomination valid for withdrawal for a year.
    pub fn new(value: Amount) -> Result<Self, AmountError> {
        let zero = Amount::zero(value.currency())?;
        Ok(Self {
            value,
            fee_withdraw: zero.clone(),
            fee_deposit: zero.clone(),
            fee_refresh: zero.clone(),
            fee_refund: zero,
            withdraw_secs: YEAR_SECS,
            deposit_secs: 2 * YEAR_SECS,
            legal_secs: 5 * YEAR_SECS,
        })
    }

    pub fn with_fees(mut self, withdraw: Amount, deposit: Amount, refresh: Amount) -> Self {
        self.fee_withdraw = withdraw;
        self.fee_deposit = deposit;
        self.fee_refresh = refresh;
        self
    }

    pub fn with_withdraw_secs(mut self, secs: u64) -> Self {
        self.withdraw_secs = secs;
        self
    }

    /// Seconds from creation until withdrawal, deposit and legal expiry.
    pub fn with_lifetimes(mut self, withdraw: u64, deposit: u64, legal: u64) -> Self {
        self.withdraw_secs = withdraw;
        self.deposit_secs = deposit;
        self.legal_secs = legal;
        self
    }
}

#[derive(Clone, Debug)]
pub struct FakeExchangeConfig {
    /// Base URL with trailing slash.
    pub exchange_url: String,
    pub bank_url: String,
    pub currency: String,
    pub kappa: u32,
    pub denominations: Vec<DenomSpec>,
}

impl FakeExchangeConfig {
    /// Fee-free denominations with the given values, e.g. `&["8", "2", "1"]`.
    pub fn with_values(currency: &str, values: &[&str]) -> Result<Self, AmountError> {
        let denominations = values
            .iter()
            .map(|v| DenomSpec::new(Amount::parse(&format!("{currency}:{v}"))?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            exchange_url: "https://exchange.test/".into(),
            bank_url: "https://bank.test/".into(),
            currency: currency.to_ascii_uppercase(),
            kappa: 3,
            denominations,
        })
    }
}

struct FakeDenom {
    spec: DenomSpec,
    keys: DenomKeyPair,
    hash: HashCode,
    stamp_start: Timestamp,
    stamp_expire_withdraw: Timestamp,
    stamp_expire_deposit: Timestamp,
    stamp_expire_legal: Timestamp,
    master_sig: EddsaSignature,
    revoked: bool,
}

struct WithdrawalEntry {
    reserve_pub: EddsaPublicKey,
    ev_sig: BlindedSignature,
}

struct KnownCoin {
    value: Amount,
    spent: Amount,
    /// Deposits by contract hash.
    deposits: HashMap<HashCode, DepositResponse>,
}

struct MeltEntry {
    coin_pub: EddsaPublicKey,
    amount_with_fee: Amount,
    /// Refresh fee of the melted coin's denomination.
    fee_refresh: Amount,
    noreveal_index: u32,
    response: MeltResponse,
    ev_sigs: Option<Vec<BlindedSignature>>,
}

#[derive(Default)]
struct ExchangeState {
    denoms: Vec<FakeDenom>,
    reserves: HashMap<EddsaPublicKey, Amount>,
    withdrawals: HashMap<BlindedPlanchet, WithdrawalEntry>,
    coins: HashMap<EddsaPublicKey, KnownCoin>,
    melts: HashMap<HashCode, MeltEntry>,
    /// Planchets produced by a reveal, mapped to the melted coin.
    refreshed: HashMap<BlindedPlanchet, EddsaPublicKey>,
    bank_row: u64,
    offline: bool,
    injected: Vec<(String, u16)>,
    requests: HashMap<&'static str, u64>,
}

struct Rejection {
    status: u16,
    code: u32,
    hint: String,
}

impl Rejection {
    fn new(status: u16, code: u32, hint: impl Into<String>) -> Self {
        Self {
            status,
            code,
            hint: hint.into(),
        }
    }

    fn bad_request(hint: impl Into<String>) -> Self {
        Self::new(400, codes::BAD_REQUEST, hint)
    }

    fn into_response(self) -> HttpResponse {
        let body = ErrorResponse {
            code: self.code,
            hint: self.hint,
        };
        match serde_json::to_value(&body) {
            Ok(v) => HttpResponse::json_body(self.status, &v),
            Err(_) => HttpResponse::new(self.status, ""),
        }
    }
}

impl From<AmountError> for Rejection {
    fn from(e: AmountError) -> Self {
        Rejection::bad_request(e.to_string())
    }
}

type Handled = Result<Value, Rejection>;

fn reply<T: Serialize>(body: &T) -> Handled {
    serde_json::to_value(body).map_err(|e| Rejection::new(500, 0, e.to_string()))
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Option<&Value>) -> Result<T, Rejection> {
    let body = body.ok_or_else(|| Rejection::bad_request("missing body"))?;
    serde_json::from_value(body.clone()).map_err(|e| Rejection::bad_request(e.to_string()))
}

fn parse_pub(segment: &str) -> Result<EddsaPublicKey, Rejection> {
    EddsaPublicKey::from_crock(segment).map_err(|e| Rejection::bad_request(e.to_string()))
}

enum Route<'a> {
    Keys,
    ReserveStatus(&'a str),
    Withdraw(&'a str),
    Deposit(&'a str),
    Melt(&'a str),
    Reveal(&'a str),
    Recoup(&'a str),
    AddIncoming,
}

impl Route<'_> {
    fn label(&self) -> &'static str {
        match self {
            Route::Keys => "keys",
            Route::ReserveStatus(_) => "reserve",
            Route::Withdraw(_) => "withdraw",
            Route::Deposit(_) => "deposit",
            Route::Melt(_) => "melt",
            Route::Reveal(_) => "reveal",
            Route::Recoup(_) => "recoup",
            Route::AddIncoming => "add-incoming",
        }
    }
}

pub struct FakeExchange {
    exchange_url: String,
    bank_url: String,
    currency: String,
    kappa: u32,
    clock: Arc<dyn Clock>,
    master: EddsaKeyPair,
    signkey: EddsaKeyPair,
    signkey_start: Timestamp,
    signkey_expire: Timestamp,
    signkey_master_sig: EddsaSignature,
    list_issue_date: Timestamp,
    state: Mutex<ExchangeState>,
}

impl FakeExchange {
    pub fn new(config: FakeExchangeConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let start = Timestamp::new(now.as_secs().saturating_sub(60));
        let master = eddsa_keypair_from_seed(&kdf32(
            config.exchange_url.as_bytes(),
            b"",
            b"fake-exchange-master-key",
        ));
        let signkey = eddsa_keypair_from_seed(&kdf32(
            config.exchange_url.as_bytes(),
            b"",
            b"fake-exchange-signing-key",
        ));
        let signkey_expire = now.add_secs(2 * YEAR_SECS);
        let signkey_master_sig =
            purpose::signing_key_validity(&master.public, start, signkey_expire, &signkey.public)
                .sign(&master.private);

        let denoms = config
            .denominations
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let seed = format!("{}#{}#{}", config.exchange_url, i, spec.value);
                let keys = denom_keypair_from_seed(seed.as_bytes());
                let hash = taler_crypto::denom_pub_hash(&keys.public);
                let stamp_expire_withdraw = now.add_secs(spec.withdraw_secs);
                let stamp_expire_deposit = now.add_secs(spec.deposit_secs);
                let stamp_expire_legal = now.add_secs(spec.legal_secs);
                let master_sig = purpose::denomination_validity(&DenominationValidity {
                    master_pub: &master.public,
                    stamp_start: start,
                    stamp_expire_withdraw,
                    stamp_expire_deposit,
                    stamp_expire_legal,
                    value: &spec.value,
                    fee_withdraw: &spec.fee_withdraw,
                    fee_deposit: &spec.fee_deposit,
                    fee_refresh: &spec.fee_refresh,
                    fee_refund: &spec.fee_refund,
                    denom_pub_hash: &hash,
                })
                .sign(&master.private);
                FakeDenom {
                    spec,
                    keys,
                    hash,
                    stamp_start: start,
                    stamp_expire_withdraw,
                    stamp_expire_deposit,
                    stamp_expire_legal,
                    master_sig,
                    revoked: false,
                }
            })
            .collect();

        Self {
            exchange_url: config.exchange_url,
            bank_url: config.bank_url,
            currency: config.currency,
            kappa: config.kappa,
            clock,
            master,
            signkey,
            signkey_start: start,
            signkey_expire,
            signkey_master_sig,
            list_issue_date: now,
            state: Mutex::new(ExchangeState {
                denoms,
                ..ExchangeState::default()
            }),
        }
    }

    pub fn exchange_url(&self) -> &str {
        &self.exchange_url
    }

    pub fn bank_url(&self) -> &str {
        &self.bank_url
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn master_pub(&self) -> EddsaPublicKey {
        self.master.public
    }

    /// `(value, denom_pub_hash)` of every denomination, in configuration order.
    pub fn denominations(&self) -> Vec<(Amount, HashCode)> {
        self.lock()
            .denoms
            .iter()
            .map(|d| (d.spec.value.clone(), d.hash))
            .collect()
    }

    /// Revoke a denomination; it shows up in the `recoup` list of `/keys`.
    pub fn revoke_denomination(&self, denom_pub_hash: &HashCode) -> bool {
        let mut state = self.lock();
        match state.denoms.iter_mut().find(|d| d.hash == *denom_pub_hash) {
            Some(d) => {
                d.revoked = true;
                true
            }
            None => false,
        }
    }

    /// While offline every request fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Answer the next request whose URL contains `url_part` with `status`.
    pub fn inject_error(&self, url_part: &str, status: u16) {
        self.lock().injected.push((url_part.to_string(), status));
    }

    pub fn reserve_balance(&self, reserve_pub: &EddsaPublicKey) -> Option<Amount> {
        self.lock().reserves.get(reserve_pub).cloned()
    }

    pub fn credit_reserve(&self, reserve_pub: EddsaPublicKey, amount: &Amount) -> Result<(), AmountError> {
        let mut state = self.lock();
        credit(&mut state.reserves, reserve_pub, amount)
    }

    /// Amount the exchange has seen spent from a coin (deposits, melts, recoups).
    pub fn coin_spent(&self, coin_pub: &EddsaPublicKey) -> Option<Amount> {
        self.lock().coins.get(coin_pub).map(|c| c.spent.clone())
    }

    /// Number of distinct planchets signed for withdrawal.
    pub fn withdrawal_count(&self) -> usize {
        self.lock().withdrawals.len()
    }

    /// Number of requests served per endpoint: `keys`, `reserve`, `withdraw`,
    /// `deposit`, `melt`, `reveal`, `recoup`, `add-incoming`.
    pub fn request_count(&self, endpoint: &str) -> u64 {
        self.lock().requests.get(endpoint).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn route<'a>(&self, method: &str, url: &'a str) -> Option<Route<'a>> {
        if let Some(path) = url.strip_prefix(self.bank_url.as_str()) {
            return (method == "POST" && path == "admin/add-incoming").then_some(Route::AddIncoming);
        }
        let path = url.strip_prefix(self.exchange_url.as_str())?;
        let segments: Vec<&str> = path.split('/').collect();
        match (method, segments.as_slice()) {
            ("GET", ["keys"]) => Some(Route::Keys),
            ("GET", ["reserves", p]) => Some(Route::ReserveStatus(p)),
            ("POST", ["reserves", p, "withdraw"]) => Some(Route::Withdraw(p)),
            ("POST", ["coins", p, "deposit"]) => Some(Route::Deposit(p)),
            ("POST", ["coins", p, "melt"]) => Some(Route::Melt(p)),
            ("POST", ["coins", p, "reveal"]) => Some(Route::Reveal(p)),
            ("POST", ["coins", p, "recoup"]) => Some(Route::Recoup(p)),
            _ => None,
        }
    }

    fn handle(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, NetworkError> {
        let mut state = self.lock();
        if state.offline {
            return Err(NetworkError::ConnectionFailed(format!("{url}: exchange offline")));
        }
        let Some(route) = self.route(method, url) else {
            return Ok(HttpResponse::new(404, ""));
        };
        *state.requests.entry(route.label()).or_default() += 1;
        if let Some(pos) = state.injected.iter().position(|(p, _)| url.contains(p.as_str())) {
            let (_, status) = state.injected.remove(pos);
            debug!(url, status, "injected error");
            return Ok(Rejection::new(status, 0, "injected failure").into_response());
        }

        let now = self.clock.now();
        let result = match route {
            Route::Keys => self.keys(&state),
            Route::ReserveStatus(p) => reserve_status(&state, p),
            Route::Withdraw(p) => self.withdraw(&mut state, p, body, now),
            Route::Deposit(p) => self.deposit(&mut state, p, body, now),
            Route::Melt(p) => self.melt(&mut state, p, body),
            Route::Reveal(p) => self.reveal(&mut state, p, body),
            Route::Recoup(p) => recoup(&mut state, p, body),
            Route::AddIncoming => self.add_incoming(&mut state, body, now),
        };
        Ok(match result {
            Ok(v) => HttpResponse::json_body(200, &v),
            Err(r) => {
                debug!(url, status = r.status, code = r.code, hint = %r.hint, "request rejected");
                r.into_response()
            }
        })
    }

    fn keys(&self, state: &ExchangeState) -> Handled {
        let denoms = state
            .denoms
            .iter()
            .map(|d| DenominationInfo {
                denom_pub: d.keys.public,
                value: d.spec.value.clone(),
                fee_withdraw: d.spec.fee_withdraw.clone(),
                fee_deposit: d.spec.fee_deposit.clone(),
                fee_refresh: d.spec.fee_refresh.clone(),
                fee_refund: d.spec.fee_refund.clone(),
                stamp_start: d.stamp_start,
                stamp_expire_withdraw: d.stamp_expire_withdraw,
                stamp_expire_deposit: d.stamp_expire_deposit,
                stamp_expire_legal: d.stamp_expire_legal,
                master_sig: d.master_sig,
            })
            .collect();
        let hashes: Vec<HashCode> = state.denoms.iter().map(|d| d.hash).collect();
        let eddsa_sig = purpose::key_set(self.list_issue_date, &purpose::denominations_hash(&hashes))
            .sign(&self.signkey.private);
        reply(&KeysResponse {
            version: "17:0:0".into(),
            currency: self.currency.clone(),
            master_public_key: self.master.public,
            list_issue_date: self.list_issue_date,
            denoms,
            signkeys: vec![SignKeyInfo {
                key: self.signkey.public,
                stamp_start: self.signkey_start,
                stamp_expire: self.signkey_expire,
                master_sig: self.signkey_master_sig,
            }],
            auditors: Vec::<AuditorEntry>::new(),
            recoup: state
                .denoms
                .iter()
                .filter(|d| d.revoked)
                .map(|d| RecoupEntry { h_denom_pub: d.hash })
                .collect(),
            eddsa_pub: self.signkey.public,
            eddsa_sig,
        })
    }

    fn withdraw(
        &self,
        state: &mut ExchangeState,
        reserve: &str,
        body: Option<&Value>,
        now: Timestamp,
    ) -> Handled {
        let reserve_pub = parse_pub(reserve)?;
        let req: WithdrawRequest = parse_body(body)?;

        if let Some(done) = state.withdrawals.get(&req.coin_ev) {
            if done.reserve_pub == reserve_pub {
                return reply(&WithdrawResponse { ev_sig: done.ev_sig });
            }
        }

        let denom = find_denom(state, &req.denom_pub_hash)?;
        if denom.revoked {
            return Err(Rejection::new(410, codes::DENOMINATION_REVOKED, "denomination revoked"));
        }
        if now < denom.stamp_start || now >= denom.stamp_expire_withdraw {
            return Err(Rejection::new(
                410,
                codes::DENOMINATION_EXPIRED,
                "denomination not valid for withdrawal",
            ));
        }
        let amount_with_fee = denom.spec.value.checked_add(&denom.spec.fee_withdraw)?;
        let ev_hash = coin_ev_hash(&req.coin_ev, &req.denom_pub_hash);
        let signed = purpose::withdraw_request(
            &reserve_pub,
            &amount_with_fee,
            &denom.spec.fee_withdraw,
            &req.denom_pub_hash,
            &ev_hash,
        );
        if !signed.verify(&req.reserve_sig, &reserve_pub) {
            return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad reserve signature"));
        }
        let ev_sig = sign_blinded(&denom.keys.private, &req.coin_ev)
            .map_err(|e| Rejection::bad_request(e.to_string()))?;

        let balance = state
            .reserves
            .get(&reserve_pub)
            .ok_or_else(|| Rejection::new(404, codes::RESERVE_UNKNOWN, "reserve unknown"))?;
        let remaining = balance.checked_sub(&amount_with_fee).map_err(|_| {
            Rejection::new(409, codes::RESERVE_INSUFFICIENT_FUNDS, "insufficient reserve balance")
        })?;
        state.reserves.insert(reserve_pub, remaining);
        state.withdrawals.insert(
            req.coin_ev,
            WithdrawalEntry {
                reserve_pub,
                ev_sig,
            },
        );
        reply(&WithdrawResponse { ev_sig })
    }

    fn deposit(
        &self,
        state: &mut ExchangeState,
        coin: &str,
        body: Option<&Value>,
        now: Timestamp,
    ) -> Handled {
        let coin_pub = parse_pub(coin)?;
        let req: DepositRequest = parse_body(body)?;
        let denom = find_denom(state, &req.denom_pub_hash)?;
        if denom.revoked {
            return Err(Rejection::new(410, codes::DENOMINATION_REVOKED, "denomination revoked"));
        }
        if now >= denom.stamp_expire_deposit {
            return Err(Rejection::new(410, codes::DENOMINATION_EXPIRED, "denomination expired"));
        }
        if !verify_denom_signature(&denom.keys.private, &coin_pub, &req.ub_sig) {
            return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad denomination signature"));
        }
        if wire_hash(&req.wire, req.wire_salt.as_bytes()) != req.h_wire {
            return Err(Rejection::bad_request("wire hash mismatch"));
        }
        let fee_deposit = denom.spec.fee_deposit.clone();
        let value = denom.spec.value.clone();
        let signed = purpose::deposit_request(&DepositSignInput {
            contract_terms_hash: &req.h_contract_terms,
            wire_hash: &req.h_wire,
            denom_pub_hash: &req.denom_pub_hash,
            timestamp: req.timestamp,
            refund_deadline: req.refund_deadline,
            amount_with_fee: &req.contribution,
            deposit_fee: &fee_deposit,
            merchant_pub: &req.merchant_pub,
        });
        if !signed.verify(&req.coin_sig, &coin_pub) {
            return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad coin signature"));
        }
        let amount_without_fee = req
            .contribution
            .checked_sub(&fee_deposit)
            .map_err(|_| Rejection::bad_request("contribution below deposit fee"))?;

        let known = known_coin(state, coin_pub, &value)?;
        if let Some(done) = known.deposits.get(&req.h_contract_terms) {
            return reply(done);
        }
        debit_coin(known, &req.contribution)?;
        let exchange_sig = purpose::deposit_confirmation(
            &req.h_contract_terms,
            &req.h_wire,
            req.timestamp,
            &amount_without_fee,
            &coin_pub,
            &req.merchant_pub,
        )
        .sign(&self.signkey.private);
        let response = DepositResponse {
            exchange_pub: self.signkey.public,
            exchange_sig,
        };
        known.deposits.insert(req.h_contract_terms, response.clone());
        reply(&response)
    }

    fn melt(&self, state: &mut ExchangeState, coin: &str, body: Option<&Value>) -> Handled {
        let coin_pub = parse_pub(coin)?;
        let req: MeltRequest = parse_body(body)?;
        if let Some(done) = state.melts.get(&req.rc) {
            if done.coin_pub == coin_pub {
                return reply(&done.response);
            }
        }
        let denom = find_denom(state, &req.denom_pub_hash)?;
        if denom.revoked {
            return Err(Rejection::new(410, codes::DENOMINATION_REVOKED, "denomination revoked"));
        }
        if !verify_denom_signature(&denom.keys.private, &coin_pub, &req.denom_sig) {
            return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad denomination signature"));
        }
        let signed =
            purpose::melt_request(&req.rc, &req.value_with_fee, &denom.spec.fee_refresh, &coin_pub);
        if !signed.verify(&req.confirm_sig, &coin_pub) {
            return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad melt signature"));
        }
        let value = denom.spec.value.clone();
        let fee_refresh = denom.spec.fee_refresh.clone();
        let known = known_coin(state, coin_pub, &value)?;
        debit_coin(known, &req.value_with_fee)?;

        let noreveal_index = u32::from(req.rc.0[0]) % self.kappa;
        let response = MeltResponse {
            noreveal_index,
            exchange_pub: self.signkey.public,
            exchange_sig: purpose::melt_confirmation(&req.rc, noreveal_index)
                .sign(&self.signkey.private),
        };
        state.melts.insert(
            req.rc,
            MeltEntry {
                coin_pub,
                amount_with_fee: req.value_with_fee,
                fee_refresh,
                noreveal_index,
                response: response.clone(),
                ev_sigs: None,
            },
        );
        reply(&response)
    }

    fn reveal(&self, state: &mut ExchangeState, coin: &str, body: Option<&Value>) -> Handled {
        let coin_pub = parse_pub(coin)?;
        let req: RevealRequest = parse_body(body)?;
        let melt = state.melts.get(&req.rc).ok_or_else(|| {
            Rejection::new(404, codes::REFRESH_SESSION_UNKNOWN, "no melt for commitment")
        })?;
        if melt.coin_pub != coin_pub {
            return Err(Rejection::new(404, codes::REFRESH_SESSION_UNKNOWN, "melt belongs to other coin"));
        }
        if let Some(ev_sigs) = &melt.ev_sigs {
            return reply(&RevealResponse {
                ev_sigs: ev_sigs.clone(),
            });
        }
        let noreveal_index = melt.noreveal_index;
        let amount_with_fee = melt.amount_with_fee.clone();
        let fee_refresh = melt.fee_refresh.clone();

        let kappa = self.kappa as usize;
        if req.transfer_pubs.len() != kappa
            || req.transfer_privs.len() + 1 != kappa
            || req.coin_evs.len() != req.new_denoms_h.len()
        {
            return Err(Rejection::bad_request("malformed reveal request"));
        }

        let mut new_denoms = Vec::with_capacity(req.new_denoms_h.len());
        let mut cost = fee_refresh;
        for h in &req.new_denoms_h {
            let d = find_denom(state, h)?;
            cost = cost
                .checked_add(&d.spec.value)?
                .checked_add(&d.spec.fee_withdraw)?;
            new_denoms.push((d.keys.public, d.keys.private.clone()));
        }
        if cost.cmp_checked(&amount_with_fee)?.is_gt() {
            return Err(Rejection::new(
                409,
                codes::REFRESH_COMMITMENT_MISMATCH,
                "new coins exceed melted value",
            ));
        }

        let new_pubs: Vec<_> = new_denoms.iter().map(|(p, _)| *p).collect();
        let mut all_evs: Vec<Vec<BlindedPlanchet>> = Vec::with_capacity(kappa);
        let mut privs = req.transfer_privs.iter();
        for i in 0..kappa {
            if i as u32 == noreveal_index {
                all_evs.push(req.coin_evs.clone());
                continue;
            }
            let Some(transfer_priv) = privs.next() else {
                return Err(Rejection::bad_request("missing transfer key"));
            };
            if ecdhe_public_from_private(transfer_priv) != req.transfer_pubs[i] {
                return Err(Rejection::new(
                    409,
                    codes::REFRESH_COMMITMENT_MISMATCH,
                    "transfer key does not match",
                ));
            }
            let planchets = derive_refresh_planchets(transfer_priv, &coin_pub, &new_pubs)
                .map_err(|e| Rejection::bad_request(e.to_string()))?;
            all_evs.push(planchets.iter().map(|p| p.blinded).collect());
        }
        let rc = refresh_commitment(
            &req.transfer_pubs,
            &all_evs,
            &req.new_denoms_h,
            &coin_pub,
            &amount_with_fee,
        );
        if rc != req.rc {
            return Err(Rejection::new(
                409,
                codes::REFRESH_COMMITMENT_MISMATCH,
                "commitment mismatch",
            ));
        }

        let mut ev_sigs = Vec::with_capacity(req.coin_evs.len());
        for (ev, (_, private)) in req.coin_evs.iter().zip(&new_denoms) {
            ev_sigs.push(
                sign_blinded(private, ev).map_err(|e| Rejection::bad_request(e.to_string()))?,
            );
        }
        for ev in &req.coin_evs {
            state.refreshed.insert(*ev, coin_pub);
        }
        if let Some(melt) = state.melts.get_mut(&req.rc) {
            melt.ev_sigs = Some(ev_sigs.clone());
        }
        reply(&RevealResponse { ev_sigs })
    }

    fn add_incoming(
        &self,
        state: &mut ExchangeState,
        body: Option<&Value>,
        now: Timestamp,
    ) -> Handled {
        let req: AddIncomingRequest = parse_body(body)?;
        if req.amount.currency() != self.currency {
            return Err(Rejection::bad_request("wrong currency"));
        }
        credit(&mut state.reserves, req.reserve_pub, &req.amount)?;
        state.bank_row += 1;
        reply(&AddIncomingResponse {
            row_id: state.bank_row,
            timestamp: now,
        })
    }
}

fn find_denom<'a>(state: &'a ExchangeState, hash: &HashCode) -> Result<&'a FakeDenom, Rejection> {
    state
        .denoms
        .iter()
        .find(|d| d.hash == *hash)
        .ok_or_else(|| Rejection::new(404, codes::DENOMINATION_UNKNOWN, "unknown denomination"))
}

fn known_coin<'a>(
    state: &'a mut ExchangeState,
    coin_pub: EddsaPublicKey,
    value: &Amount,
) -> Result<&'a mut KnownCoin, Rejection> {
    let zero = Amount::zero(value.currency())?;
    Ok(state.coins.entry(coin_pub).or_insert_with(|| KnownCoin {
        value: value.clone(),
        spent: zero,
        deposits: HashMap::new(),
    }))
}

fn debit_coin(coin: &mut KnownCoin, amount: &Amount) -> Result<(), Rejection> {
    let spent = coin.spent.checked_add(amount)?;
    if spent.cmp_checked(&coin.value)?.is_gt() {
        return Err(Rejection::new(409, codes::COIN_INSUFFICIENT_FUNDS, "coin already spent"));
    }
    coin.spent = spent;
    Ok(())
}

fn credit(
    reserves: &mut HashMap<EddsaPublicKey, Amount>,
    reserve_pub: EddsaPublicKey,
    amount: &Amount,
) -> Result<(), AmountError> {
    let balance = match reserves.get(&reserve_pub) {
        Some(b) => b.checked_add(amount)?,
        None => amount.clone(),
    };
    reserves.insert(reserve_pub, balance);
    Ok(())
}

fn reserve_status(state: &ExchangeState, reserve: &str) -> Handled {
    let reserve_pub = parse_pub(reserve)?;
    match state.reserves.get(&reserve_pub) {
        Some(balance) => reply(&ReserveStatusResponse {
            balance: balance.clone(),
        }),
        None => Err(Rejection::new(404, codes::RESERVE_UNKNOWN, "reserve unknown")),
    }
}

fn recoup(state: &mut ExchangeState, coin: &str, body: Option<&Value>) -> Handled {
    let coin_pub = parse_pub(coin)?;
    let req: RecoupRequest = parse_body(body)?;
    let denom = find_denom(state, &req.denom_pub_hash)?;
    if !denom.revoked {
        return Err(Rejection::bad_request("denomination not revoked"));
    }
    if !verify_denom_signature(&denom.keys.private, &coin_pub, &req.denom_sig) {
        return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad denomination signature"));
    }
    let bks_hash = sha512(req.coin_blind_key_secret.as_bytes());
    if !purpose::recoup_request(&coin_pub, &req.denom_pub_hash, &bks_hash)
        .verify(&req.coin_sig, &coin_pub)
    {
        return Err(Rejection::new(403, codes::COIN_SIGNATURE_INVALID, "bad recoup signature"));
    }
    let value = denom.spec.value.clone();
    let coin_ev = blind(&coin_pub, &req.coin_blind_key_secret);

    let known = known_coin(state, coin_pub, &value)?;
    let remaining = known.value.checked_sub(&known.spent)?;
    known.spent = known.value.clone();

    if req.refreshed {
        let old_coin_pub = *state
            .refreshed
            .get(&coin_ev)
            .ok_or_else(|| Rejection::new(404, codes::COIN_SIGNATURE_INVALID, "coin not from a refresh"))?;
        if let Some(old) = state.coins.get_mut(&old_coin_pub) {
            old.spent = old.spent.saturating_sub(&remaining)?.amount;
        }
        reply(&RecoupResponse {
            reserve_pub: None,
            old_coin_pub: Some(old_coin_pub),
        })
    } else {
        let reserve_pub = state
            .withdrawals
            .get(&coin_ev)
            .map(|w| w.reserve_pub)
            .ok_or_else(|| Rejection::new(404, codes::RESERVE_UNKNOWN, "coin not withdrawn here"))?;
        credit(&mut state.reserves, reserve_pub, &remaining)?;
        reply(&RecoupResponse {
            reserve_pub: Some(reserve_pub),
            old_coin_pub: None,
        })
    }
}

#[async_trait]
impl HttpClient for FakeExchange {
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError> {
        self.handle("GET", url, None)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse, NetworkError> {
        self.handle("POST", url, Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullClock;
    use serde_json::json;
    use taler_crypto::{
        create_planchet, derive_refresh_session, derive_withdrawal_secrets,
        generate_eddsa_keypair, unblind_and_verify, Planchet,
    };
    use taler_types::{DenomPublicKey, DenomSignature};

    const EX: &str = "https://exchange.test/";

    fn kudos(v: &str) -> Amount {
        Amount::parse(&format!("KUDOS:{v}")).unwrap()
    }

    fn setup() -> FakeExchange {
        let clock = Arc::new(NullClock::new(1_700_000_000));
        FakeExchange::new(
            FakeExchangeConfig::with_values("KUDOS", &["8", "2", "1"]).unwrap(),
            clock,
        )
    }

    async fn keys(ex: &FakeExchange) -> KeysResponse {
        ex.get(&format!("{EX}keys")).await.unwrap().json().unwrap()
    }

    async fn fund(ex: &FakeExchange, reserve_pub: EddsaPublicKey, amount: &str) {
        let resp = ex
            .post_json(
                "https://bank.test/admin/add-incoming",
                &json!({"amount": kudos(amount), "reserve_pub": reserve_pub, "debit_account": "payto://x-taler-bank/bank.test/alice"}),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    fn withdraw_body(reserve: &EddsaKeyPair, planchet: &Planchet, value: &str) -> Value {
        let sig = purpose::withdraw_request(
            &reserve.public,
            &kudos(value),
            &kudos("0"),
            &planchet.denom_pub_hash,
            &planchet.coin_ev_hash,
        )
        .sign(&reserve.private);
        json!({
            "denom_pub_hash": planchet.denom_pub_hash,
            "coin_ev": planchet.blinded,
            "reserve_sig": sig,
        })
    }

    /// Withdraw one coin of `denom_pub` worth `value`.
    async fn withdraw(
        ex: &FakeExchange,
        reserve: &EddsaKeyPair,
        denom_pub: &DenomPublicKey,
        value: &str,
        index: u32,
    ) -> (Planchet, DenomSignature) {
        let planchet = create_planchet(derive_withdrawal_secrets(&[7u8; 32], index), denom_pub);
        let resp = ex
            .post_json(
                &format!("{EX}reserves/{}/withdraw", reserve.public),
                &withdraw_body(reserve, &planchet, value),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 200, "{}", resp.body);
        let w: WithdrawResponse = resp.json().unwrap();
        let sig = unblind_and_verify(
            &planchet.blinded,
            &w.ev_sig,
            &planchet.secrets.blinding_secret,
            denom_pub,
        )
        .unwrap();
        (planchet, sig)
    }

    fn deposit_body(
        coin: &Planchet,
        denom_sig: &DenomSignature,
        contribution: &str,
        contract: &HashCode,
    ) -> Value {
        let merchant = EddsaPublicKey([4u8; 32]);
        let wire = "payto://x-taler-bank/bank.test/shop";
        let h_wire = wire_hash(wire, b"salt");
        let ts = Timestamp::new(1_700_000_000);
        let coin_sig = purpose::deposit_request(&DepositSignInput {
            contract_terms_hash: contract,
            wire_hash: &h_wire,
            denom_pub_hash: &coin.denom_pub_hash,
            timestamp: ts,
            refund_deadline: ts,
            amount_with_fee: &kudos(contribution),
            deposit_fee: &kudos("0"),
            merchant_pub: &merchant,
        })
        .sign(&coin.secrets.coin_priv);
        json!({
            "contribution": kudos(contribution),
            "denom_pub_hash": coin.denom_pub_hash,
            "ub_sig": denom_sig,
            "merchant_pub": merchant,
            "h_contract_terms": contract,
            "h_wire": h_wire,
            "wire": wire,
            "wire_salt": "salt",
            "timestamp": ts,
            "refund_deadline": ts,
            "coin_sig": coin_sig,
        })
    }

    #[tokio::test]
    async fn keys_carry_valid_signatures() {
        let ex = setup();
        let keys = keys(&ex).await;
        assert_eq!(keys.denoms.len(), 3);
        let sk = &keys.signkeys[0];
        assert!(purpose::signing_key_validity(
            &keys.master_public_key,
            sk.stamp_start,
            sk.stamp_expire,
            &sk.key
        )
        .verify(&sk.master_sig, &keys.master_public_key));
        let hashes: Vec<HashCode> = keys
            .denoms
            .iter()
            .map(|d| taler_crypto::denom_pub_hash(&d.denom_pub))
            .collect();
        assert!(
            purpose::key_set(keys.list_issue_date, &purpose::denominations_hash(&hashes))
                .verify(&keys.eddsa_sig, &keys.eddsa_pub)
        );
        assert!(keys.recoup.is_empty());
    }

    #[tokio::test]
    async fn repeated_withdrawal_is_not_debited_twice() {
        let ex = setup();
        let denom = keys(&ex).await.denoms[0].denom_pub;
        let reserve = generate_eddsa_keypair();
        fund(&ex, reserve.public, "10").await;

        let (_, first) = withdraw(&ex, &reserve, &denom, "8", 0).await;
        let (_, second) = withdraw(&ex, &reserve, &denom, "8", 0).await;
        assert_eq!(first, second);
        assert_eq!(ex.reserve_balance(&reserve.public), Some(kudos("2")));
        assert_eq!(ex.withdrawal_count(), 1);
        assert_eq!(ex.request_count("withdraw"), 2);
    }

    #[tokio::test]
    async fn withdrawal_beyond_balance_conflicts() {
        let ex = setup();
        let denom = keys(&ex).await.denoms[0].denom_pub;
        let reserve = generate_eddsa_keypair();
        fund(&ex, reserve.public, "5").await;
        let planchet = create_planchet(derive_withdrawal_secrets(&[1u8; 32], 0), &denom);
        let resp = ex
            .post_json(
                &format!("{EX}reserves/{}/withdraw", reserve.public),
                &withdraw_body(&reserve, &planchet, "8"),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 409);
        let err: ErrorResponse = resp.json().unwrap();
        assert_eq!(err.code, codes::RESERVE_INSUFFICIENT_FUNDS);
        assert_eq!(ex.reserve_balance(&reserve.public), Some(kudos("5")));
    }

    #[tokio::test]
    async fn double_spend_is_refused_but_replay_is_fine() {
        let ex = setup();
        let denom = keys(&ex).await.denoms[1].denom_pub;
        let reserve = generate_eddsa_keypair();
        fund(&ex, reserve.public, "2").await;
        let (coin, sig) = withdraw(&ex, &reserve, &denom, "2", 0).await;
        let url = format!("{EX}coins/{}/deposit", coin.secrets.coin_pub);

        let first = deposit_body(&coin, &sig, "2", &HashCode([1u8; 64]));
        assert_eq!(ex.post_json(&url, &first).await.unwrap().status, 200);
        assert_eq!(ex.post_json(&url, &first).await.unwrap().status, 200);

        let other = deposit_body(&coin, &sig, "1", &HashCode([2u8; 64]));
        let resp = ex.post_json(&url, &other).await.unwrap();
        assert_eq!(resp.status, 409);
        assert_eq!(ex.coin_spent(&coin.secrets.coin_pub), Some(kudos("2")));
    }

    #[tokio::test]
    async fn melt_and_reveal_round_trip() {
        let ex = setup();
        let k = keys(&ex).await;
        let (eight, two, one) = (k.denoms[0].denom_pub, k.denoms[1].denom_pub, k.denoms[2].denom_pub);
        let reserve = generate_eddsa_keypair();
        fund(&ex, reserve.public, "8").await;
        let (coin, sig) = withdraw(&ex, &reserve, &eight, "8", 0).await;
        let coin_pub = coin.secrets.coin_pub;

        let melt_amount = kudos("3");
        let session =
            derive_refresh_session(&[9u8; 32], 3, &coin_pub, &melt_amount, &[two, one]).unwrap();
        let confirm_sig = purpose::melt_request(&session.rc, &melt_amount, &kudos("0"), &coin_pub)
            .sign(&coin.secrets.coin_priv);
        let melt_body = json!({
            "denom_pub_hash": coin.denom_pub_hash,
            "denom_sig": sig,
            "value_with_fee": melt_amount,
            "rc": session.rc,
            "confirm_sig": confirm_sig,
        });
        let melt: MeltResponse = ex
            .post_json(&format!("{EX}coins/{coin_pub}/melt"), &melt_body)
            .await
            .unwrap()
            .json()
            .unwrap();
        assert!(purpose::melt_confirmation(&session.rc, melt.noreveal_index)
            .verify(&melt.exchange_sig, &melt.exchange_pub));

        let idx = melt.noreveal_index as usize;
        let kept = &session.planchets[idx];
        let reveal_body = json!({
            "rc": session.rc,
            "transfer_pubs": session.transfer_pubs,
            "transfer_privs": session
                .transfer_privs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, p)| p.clone())
                .collect::<Vec<_>>(),
            "new_denoms_h": kept.iter().map(|p| p.denom_pub_hash).collect::<Vec<_>>(),
            "coin_evs": kept.iter().map(|p| p.blinded).collect::<Vec<_>>(),
        });
        let resp = ex
            .post_json(&format!("{EX}coins/{coin_pub}/reveal"), &reveal_body)
            .await
            .unwrap();
        assert_eq!(resp.status, 200, "{}", resp.body);
        let reveal: RevealResponse = resp.json().unwrap();
        for ((p, ev_sig), denom) in kept.iter().zip(&reveal.ev_sigs).zip([two, one]) {
            assert!(unblind_and_verify(&p.blinded, ev_sig, &p.secrets.blinding_secret, &denom).is_ok());
        }
        assert_eq!(ex.coin_spent(&coin_pub), Some(kudos("3")));
    }

    #[tokio::test]
    async fn recoup_of_revoked_coin_refills_reserve() {
        let ex = setup();
        let k = keys(&ex).await;
        let reserve = generate_eddsa_keypair();
        fund(&ex, reserve.public, "2").await;
        let (coin, sig) = withdraw(&ex, &reserve, &k.denoms[1].denom_pub, "2", 0).await;
        assert_eq!(ex.reserve_balance(&reserve.public), Some(kudos("0")));

        assert!(ex.revoke_denomination(&coin.denom_pub_hash));
        assert_eq!(keys(&ex).await.recoup.len(), 1);

        let bks_hash = sha512(coin.secrets.blinding_secret.as_bytes());
        let coin_sig = purpose::recoup_request(&coin.secrets.coin_pub, &coin.denom_pub_hash, &bks_hash)
            .sign(&coin.secrets.coin_priv);
        let body = json!({
            "denom_pub_hash": coin.denom_pub_hash,
            "denom_sig": sig,
            "coin_blind_key_secret": coin.secrets.blinding_secret,
            "coin_sig": coin_sig,
            "refreshed": false,
        });
        let resp: RecoupResponse = ex
            .post_json(&format!("{EX}coins/{}/recoup", coin.secrets.coin_pub), &body)
            .await
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(resp.reserve_pub, Some(reserve.public));
        assert_eq!(ex.reserve_balance(&reserve.public), Some(kudos("2")));
    }

    #[tokio::test]
    async fn offline_and_injected_errors() {
        let ex = setup();
        ex.set_offline(true);
        assert!(ex.get(&format!("{EX}keys")).await.is_err());
        ex.set_offline(false);
        ex.inject_error("/keys", 503);
        assert_eq!(ex.get(&format!("{EX}keys")).await.unwrap().status, 503);
        assert_eq!(ex.get(&format!("{EX}keys")).await.unwrap().status, 200);
    }
}
