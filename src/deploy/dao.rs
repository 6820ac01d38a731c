//! DAO deployment pipeline
//!
//! Funds the participants, creates the governance token and the DAO
//! application, funds the application and the two contract-held signing
//! accounts, opts everyone into the token and distributes it.
//!
//! ```text
//! fund-accounts
//!   └─ create-token ─┬─ create-app ─┬─ fund-app ── opt-in-app-to-token ─┐
//!                    │              ├─ fund-dao-fund-lsig ── opt-in-dao-fund-lsig-to-token
//!                    │              └─ fund-proposal-lsig              │
//!                    ├─ opt-in-{proposer,voter-a,voter-b}-to-token ─────┤
//!                    └──────────────────────────────────────── distribute-token
//! ```

use crate::core::config::DeploymentConfig;
use crate::core::{
    GraphError, HandleValue, Pipeline, Step, StepAction, StepContext, StepError, StepOutput,
};
use crate::ledger::{
    AppArg, ApplicationParams, AssetParams, FeePolicy, Signer, TransactionGroup,
    TransactionRequest,
};
use crate::ledger::simulated::OPT_IN_ASSET_CALL;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const PIPELINE_NAME: &str = "dao";

/// Step names
pub mod steps {
    pub const FUND_ACCOUNTS: &str = "fund-accounts";
    pub const CREATE_TOKEN: &str = "create-token";
    pub const CREATE_APP: &str = "create-app";
    pub const FUND_APP: &str = "fund-app";
    pub const OPT_IN_APP_TO_TOKEN: &str = "opt-in-app-to-token";
    pub const FUND_AUXILIARY_SIGNERS: &str = "fund-auxiliary-signers";
    pub const FUND_DAO_FUND_LSIG: &str = "fund-dao-fund-lsig";
    pub const FUND_PROPOSAL_LSIG: &str = "fund-proposal-lsig";
    pub const OPT_IN_DAO_FUND_LSIG_TO_TOKEN: &str = "opt-in-dao-fund-lsig-to-token";
    pub const OPT_IN_PROPOSER_TO_TOKEN: &str = "opt-in-proposer-to-token";
    pub const OPT_IN_VOTER_A_TO_TOKEN: &str = "opt-in-voter-a-to-token";
    pub const OPT_IN_VOTER_B_TO_TOKEN: &str = "opt-in-voter-b-to-token";
    pub const DISTRIBUTE_TOKEN: &str = "distribute-token";
}

/// Handle names
pub mod handles {
    pub const GOV_TOKEN: &str = "gov-token";
    pub const DAO_APP: &str = "dao-app";
    pub const DAO_FUND_LSIG: &str = "dao-fund-lsig";
    pub const PROPOSAL_LSIG: &str = "proposal-lsig";
    pub const CREATOR: &str = "creator-account";
    pub const PROPOSER: &str = "proposer-account";
    pub const VOTER_A: &str = "voter-a-account";
    pub const VOTER_B: &str = "voter-b-account";
}

/// Template parameters substituted into logic programs
const ARG_GOV_TOKEN: &str = "ARG_GOV_TOKEN";
const ARG_DAO_APP_ID: &str = "ARG_DAO_APP_ID";
const ARG_OWNER: &str = "ARG_OWNER";

const LOCAL_INTS: u32 = 9;
const LOCAL_BYTES: u32 = 7;
const GLOBAL_INTS: u32 = 4;
const GLOBAL_BYTES: u32 = 2;

const FUND_APP_FEE: u64 = 1_000;
const APP_OPT_IN_FEE: u64 = 2_000;
const LSIG_OPT_IN_FEE: u64 = 1_000;
const DISTRIBUTION_FEE: u64 = 1_000;

/// Where a logic program's template parameter comes from
#[derive(Debug, Clone, Copy)]
enum TemplateSource {
    /// Id of an asset handle
    Asset(&'static str),
    /// Id of an application handle
    Application(&'static str),
    /// Address of an account handle
    Account(&'static str),
}

/// Who opts in to the governance token
#[derive(Debug, Clone, Copy)]
enum OptInSigner {
    /// Key account named by an account handle
    Account(&'static str),
    /// Contract account named by a contract handle
    Contract(&'static str),
}

#[derive(Debug, Clone)]
enum DaoAction {
    FundAccounts,
    CreateToken,
    CreateApp,
    FundApp,
    OptInAppToToken,
    FundLsig {
        program: String,
        handle: &'static str,
        params: Vec<(&'static str, TemplateSource)>,
    },
    OptInToToken(OptInSigner),
    DistributeToken,
}

/// One DAO step's action, bound to the deployment config
struct DaoStep {
    action: DaoAction,
    config: Arc<DeploymentConfig>,
}

#[async_trait]
impl StepAction for DaoStep {
    async fn run(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let config = &self.config;
        match &self.action {
            DaoAction::FundAccounts => fund_accounts(&ctx, config).await,
            DaoAction::CreateToken => create_token(&ctx, config).await,
            DaoAction::CreateApp => create_app(&ctx, config).await,
            DaoAction::FundApp => fund_app(&ctx, config).await,
            DaoAction::OptInAppToToken => opt_in_app_to_token(&ctx, config).await,
            DaoAction::FundLsig {
                program,
                handle,
                params,
            } => fund_lsig(&ctx, config, program, handle, params).await,
            DaoAction::OptInToToken(signer) => opt_in_to_token(&ctx, *signer).await,
            DaoAction::DistributeToken => distribute_token(&ctx, config).await,
        }
    }
}

fn funding_source(config: &DeploymentConfig) -> Signer {
    Signer::Key(config.accounts.funding.address.clone())
}

fn creator(config: &DeploymentConfig) -> Signer {
    Signer::Key(config.accounts.creator.address.clone())
}

async fn fund_accounts(ctx: &StepContext, config: &DeploymentConfig) -> Result<StepOutput, StepError> {
    let accounts = &config.accounts;
    let payments = [
        (handles::CREATOR, &accounts.creator, config.funding.creator),
        (handles::PROPOSER, &accounts.proposer, config.funding.participant),
        (handles::VOTER_A, &accounts.voter_a, config.funding.participant),
        (handles::VOTER_B, &accounts.voter_b, config.funding.participant),
    ];

    let group = TransactionGroup::new(
        payments
            .iter()
            .map(|(_, account, amount)| {
                TransactionRequest::payment(funding_source(config), account.address.clone(), *amount)
            })
            .collect(),
    )?;
    let confirmation = ctx.submit(group).await?;

    Ok(payments.iter().fold(
        StepOutput::new().with_confirmation(confirmation),
        |output, (handle, account, _)| {
            output.with_handle(*handle, HandleValue::Account(account.address.clone()))
        },
    ))
}

async fn create_token(ctx: &StepContext, config: &DeploymentConfig) -> Result<StepOutput, StepError> {
    let token = &config.token;
    let params = AssetParams {
        name: token.asset_name.clone(),
        unit_name: token.unit_name.clone(),
        total: token.total,
        decimals: token.decimals,
        default_frozen: false,
        url: None,
    };

    let confirmation = ctx
        .submit(TransactionGroup::single(TransactionRequest::create_asset(
            creator(config),
            params,
        )))
        .await?;
    let asset_id = confirmation
        .created_asset
        .ok_or_else(|| StepError::Other("ledger did not report the created asset id".to_string()))?;

    Ok(StepOutput::new()
        .with_handle(handles::GOV_TOKEN, HandleValue::Asset(asset_id))
        .with_confirmation(confirmation))
}

async fn create_app(ctx: &StepContext, config: &DeploymentConfig) -> Result<StepOutput, StepError> {
    let gov_token = ctx.handles().asset(handles::GOV_TOKEN)?;
    let dao = &config.dao;

    let mut template_params = BTreeMap::new();
    template_params.insert(ARG_GOV_TOKEN.to_string(), gov_token.to_string());

    let params = ApplicationParams {
        approval_program: dao.approval_program.clone(),
        clear_program: dao.clear_program.clone(),
        local_ints: LOCAL_INTS,
        local_bytes: LOCAL_BYTES,
        global_ints: GLOBAL_INTS,
        global_bytes: GLOBAL_BYTES,
        args: vec![
            AppArg::Int(dao.deposit),
            AppArg::Int(dao.min_support),
            AppArg::Int(dao.min_duration_secs),
            AppArg::Int(dao.max_duration_secs),
            AppArg::Str(dao.url.clone()),
        ],
        template_params,
    };
    debug!(args = ?params.args.iter().map(ToString::to_string).collect::<Vec<_>>(), "creating DAO application");

    let confirmation = ctx
        .submit(TransactionGroup::single(TransactionRequest::create_application(
            creator(config),
            params,
        )))
        .await?;
    let app_id = confirmation.created_application.ok_or_else(|| {
        StepError::Other("ledger did not report the created application id".to_string())
    })?;

    Ok(StepOutput::new()
        .with_handle(handles::DAO_APP, HandleValue::Application(app_id))
        .with_confirmation(confirmation))
}

async fn fund_app(ctx: &StepContext, config: &DeploymentConfig) -> Result<StepOutput, StepError> {
    let app_id = ctx.handles().application(handles::DAO_APP)?;
    let app_address = ctx.ledger().application_address(app_id);

    let request = TransactionRequest::payment(funding_source(config), app_address, config.funding.app)
        .with_fee(FeePolicy::Flat(FUND_APP_FEE));
    let confirmation = ctx.submit(TransactionGroup::single(request)).await?;

    Ok(StepOutput::new().with_confirmation(confirmation))
}

async fn opt_in_app_to_token(ctx: &StepContext, config: &DeploymentConfig) -> Result<StepOutput, StepError> {
    let app_id = ctx.handles().application(handles::DAO_APP)?;
    let gov_token = ctx.handles().asset(handles::GOV_TOKEN)?;

    let request = TransactionRequest::call_application(
        creator(config),
        app_id,
        vec![AppArg::Str(OPT_IN_ASSET_CALL.to_string())],
    )
    .with_foreign_assets(vec![gov_token])
    .with_fee(FeePolicy::Flat(APP_OPT_IN_FEE));
    let confirmation = ctx.submit(TransactionGroup::single(request)).await?;

    Ok(StepOutput::new().with_confirmation(confirmation))
}

async fn fund_lsig(
    ctx: &StepContext,
    config: &DeploymentConfig,
    program: &str,
    handle: &str,
    params: &[(&'static str, TemplateSource)],
) -> Result<StepOutput, StepError> {
    let mut template_params = BTreeMap::new();
    for (key, source) in params {
        let value = match source {
            TemplateSource::Asset(name) => ctx.handles().asset(name)?.to_string(),
            TemplateSource::Application(name) => ctx.handles().application(name)?.to_string(),
            TemplateSource::Account(name) => ctx.handles().address(name)?.to_string(),
        };
        template_params.insert(key.to_string(), value);
    }

    let contract = ctx.compile_logic(program, &template_params).await?;
    debug!(program, address = %contract.address, "compiled logic signature");

    let request = TransactionRequest::fund_contract(funding_source(config), contract.clone(), config.funding.lsig);
    let confirmation = ctx.submit(TransactionGroup::single(request)).await?;

    Ok(StepOutput::new()
        .with_handle(handle, HandleValue::Contract(contract))
        .with_confirmation(confirmation))
}

async fn opt_in_to_token(ctx: &StepContext, signer: OptInSigner) -> Result<StepOutput, StepError> {
    let gov_token = ctx.handles().asset(handles::GOV_TOKEN)?;

    let request = match signer {
        OptInSigner::Account(name) => {
            TransactionRequest::asset_opt_in(Signer::Key(ctx.handles().address(name)?), gov_token)
        }
        OptInSigner::Contract(name) => {
            TransactionRequest::asset_opt_in(Signer::Logic(ctx.handles().contract(name)?), gov_token)
                .with_fee(FeePolicy::Flat(LSIG_OPT_IN_FEE))
        }
    };
    let confirmation = ctx.submit(TransactionGroup::single(request)).await?;

    Ok(StepOutput::new().with_confirmation(confirmation))
}

async fn distribute_token(ctx: &StepContext, config: &DeploymentConfig) -> Result<StepOutput, StepError> {
    let gov_token = ctx.handles().asset(handles::GOV_TOKEN)?;

    let mut requests = Vec::new();
    for name in [handles::PROPOSER, handles::VOTER_A, handles::VOTER_B] {
        let receiver = ctx.handles().address(name)?;
        requests.push(
            TransactionRequest::asset_transfer(
                creator(config),
                gov_token,
                receiver,
                config.token.distribution_amount,
            )
            .with_fee(FeePolicy::Flat(DISTRIBUTION_FEE)),
        );
    }
    let confirmation = ctx.submit(TransactionGroup::new(requests)?).await?;

    Ok(StepOutput::new().with_confirmation(confirmation))
}

fn dao_step(name: &str, action: DaoAction, config: &Arc<DeploymentConfig>) -> Step {
    Step::new(name).with_action(DaoStep {
        action,
        config: config.clone(),
    })
}

/// The DAO deployment as a step list
pub fn dao_pipeline(config: &DeploymentConfig) -> Vec<Step> {
    use self::handles::*;
    use self::steps::*;

    let config = Arc::new(config.clone());
    let participant_opt_in = |step: &str, account: &'static str| {
        dao_step(step, DaoAction::OptInToToken(OptInSigner::Account(account)), &config)
            .depends_on([CREATE_TOKEN])
            .reads([GOV_TOKEN, account])
            .parallel_safe()
    };

    vec![
        dao_step(FUND_ACCOUNTS, DaoAction::FundAccounts, &config)
            .produces([CREATOR, PROPOSER, VOTER_A, VOTER_B])
            .exclusive(),
        dao_step(CREATE_TOKEN, DaoAction::CreateToken, &config)
            .depends_on([FUND_ACCOUNTS])
            .produces([GOV_TOKEN])
            .exclusive(),
        dao_step(CREATE_APP, DaoAction::CreateApp, &config)
            .depends_on([CREATE_TOKEN])
            .reads([GOV_TOKEN])
            .produces([DAO_APP])
            .exclusive(),
        dao_step(FUND_APP, DaoAction::FundApp, &config)
            .depends_on([CREATE_APP])
            .reads([DAO_APP])
            .parallel_safe(),
        dao_step(OPT_IN_APP_TO_TOKEN, DaoAction::OptInAppToToken, &config)
            .depends_on([FUND_APP, CREATE_TOKEN])
            .reads([DAO_APP, GOV_TOKEN])
            .exclusive(),
        dao_step(
            FUND_DAO_FUND_LSIG,
            DaoAction::FundLsig {
                program: config.dao.dao_fund_lsig_program.clone(),
                handle: DAO_FUND_LSIG,
                params: vec![
                    (ARG_GOV_TOKEN, TemplateSource::Asset(GOV_TOKEN)),
                    (ARG_DAO_APP_ID, TemplateSource::Application(DAO_APP)),
                ],
            },
            &config,
        )
        .depends_on([CREATE_APP])
        .reads([GOV_TOKEN, DAO_APP])
        .produces([DAO_FUND_LSIG])
        .parallel_safe(),
        dao_step(
            FUND_PROPOSAL_LSIG,
            DaoAction::FundLsig {
                program: config.dao.proposal_lsig_program.clone(),
                handle: PROPOSAL_LSIG,
                params: vec![
                    (ARG_OWNER, TemplateSource::Account(PROPOSER)),
                    (ARG_DAO_APP_ID, TemplateSource::Application(DAO_APP)),
                ],
            },
            &config,
        )
        .depends_on([CREATE_APP])
        .reads([PROPOSER, DAO_APP])
        .produces([PROPOSAL_LSIG])
        .parallel_safe(),
        Step::barrier(FUND_AUXILIARY_SIGNERS, [FUND_DAO_FUND_LSIG, FUND_PROPOSAL_LSIG]),
        dao_step(
            OPT_IN_DAO_FUND_LSIG_TO_TOKEN,
            DaoAction::OptInToToken(OptInSigner::Contract(DAO_FUND_LSIG)),
            &config,
        )
        .depends_on([FUND_DAO_FUND_LSIG, CREATE_TOKEN])
        .reads([DAO_FUND_LSIG, GOV_TOKEN])
        .parallel_safe(),
        participant_opt_in(OPT_IN_PROPOSER_TO_TOKEN, PROPOSER),
        participant_opt_in(OPT_IN_VOTER_A_TO_TOKEN, VOTER_A),
        participant_opt_in(OPT_IN_VOTER_B_TO_TOKEN, VOTER_B),
        dao_step(DISTRIBUTE_TOKEN, DaoAction::DistributeToken, &config)
            .depends_on([
                CREATE_TOKEN,
                OPT_IN_APP_TO_TOKEN,
                OPT_IN_DAO_FUND_LSIG_TO_TOKEN,
                OPT_IN_PROPOSER_TO_TOKEN,
                OPT_IN_VOTER_A_TO_TOKEN,
                OPT_IN_VOTER_B_TO_TOKEN,
            ])
            .reads([GOV_TOKEN, PROPOSER, VOTER_A, VOTER_B])
            .exclusive(),
    ]
}

/// The DAO deployment as a validated pipeline
pub fn dao_graph(config: &DeploymentConfig) -> Result<Pipeline, GraphError> {
    Pipeline::new(PIPELINE_NAME, dao_pipeline(config))
}
