//! Admin-facing write operations for the model registry, pricing, routing,
//! system config, and admin-flag management. Every rule violation surfaces
//! as a Conflict with a stable code.

use crate::config::Settings;
use crate::db::models::{
    ModelRegistryEntry, PricingConfig, PricingConfigView, SystemConfigEntry, TaskRoutingConfig,
    TaskRoutingView, User,
};
use crate::db::repos::{admin_config, users};
use crate::db::{today_ymd, DbPool};
use crate::error::AppError;

pub struct AdminService {
    pool: DbPool,
    settings: Settings,
}

impl AdminService {
    pub fn new(pool: DbPool, settings: Settings) -> Self {
        AdminService { pool, settings }
    }

    /// Gate for every operation in this service.
    fn require_admin(&self, acting_user_id: &str) -> Result<User, AppError> {
        let conn = self.pool.get()?;
        let user = users::get_by_id(&conn, acting_user_id)?;
        if !user.is_admin {
            return Err(AppError::AdminRequired);
        }
        Ok(user)
    }

    // -----------------------------------------------------------------------
    // Model registry
    // -----------------------------------------------------------------------

    pub fn list_models(
        &self,
        acting_user_id: &str,
        provider: Option<&str>,
        model_type: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Vec<ModelRegistryEntry>, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        admin_config::list_models(&conn, provider, model_type, is_active)
    }

    pub fn create_model(
        &self,
        acting_user_id: &str,
        provider: &str,
        model: &str,
        display_name: &str,
        model_type: &str,
    ) -> Result<ModelRegistryEntry, AppError> {
        self.require_admin(acting_user_id)?;
        if !matches!(model_type, "llm" | "embedding") {
            return Err(AppError::Validation("model_type must be llm or embedding".into()));
        }
        let conn = self.pool.get()?;
        if admin_config::get_model(&conn, provider, model)?.is_some() {
            return Err(AppError::conflict(
                "DUPLICATE_MODEL",
                format!("Model '{model}' already registered for provider '{provider}'"),
            ));
        }
        admin_config::insert_model(&conn, provider, model, display_name, model_type)
    }

    pub fn update_model(
        &self,
        acting_user_id: &str,
        model_id: &str,
        display_name: Option<&str>,
        is_active: Option<bool>,
        model_type: Option<&str>,
    ) -> Result<ModelRegistryEntry, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        admin_config::update_model(&conn, model_id, display_name, is_active, model_type)?
            .ok_or_else(|| AppError::NotFound(format!("Model {model_id}")))
    }

    /// Delete a registry entry; rejected while any routing row targets it.
    pub fn delete_model(&self, acting_user_id: &str, model_id: &str) -> Result<(), AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        let row = admin_config::get_model_by_id(&conn, model_id)?
            .ok_or_else(|| AppError::NotFound(format!("Model {model_id}")))?;

        if admin_config::routing_references_model(&conn, &row.provider, &row.model)? {
            return Err(AppError::conflict(
                "MODEL_IN_USE",
                format!("Model '{}' is referenced by task routing config", row.model),
            ));
        }
        admin_config::delete_model(&conn, model_id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pricing
    // -----------------------------------------------------------------------

    pub fn list_pricing(
        &self,
        acting_user_id: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Vec<PricingConfigView>, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        admin_config::list_pricing(&conn, provider, model, &today_ymd())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_pricing(
        &self,
        acting_user_id: &str,
        provider: &str,
        model: &str,
        input_cost_per_1k_micros: i64,
        output_cost_per_1k_micros: i64,
        margin_multiplier: f64,
        effective_date: &str,
    ) -> Result<PricingConfig, AppError> {
        self.require_admin(acting_user_id)?;
        if margin_multiplier <= 0.0 {
            return Err(AppError::Validation("margin_multiplier must be positive".into()));
        }
        let conn = self.pool.get()?;

        // Pricing requires a registered model.
        if admin_config::get_model(&conn, provider, model)?.is_none() {
            return Err(AppError::NotFound(format!("Model {provider}/{model}")));
        }

        match admin_config::insert_pricing(
            &conn,
            provider,
            model,
            input_cost_per_1k_micros,
            output_cost_per_1k_micros,
            margin_multiplier,
            effective_date,
        ) {
            Ok(row) => Ok(row),
            Err(e) if e.is_unique_violation() => Err(AppError::conflict(
                "DUPLICATE_PRICING",
                format!("Pricing for '{model}' on {effective_date} already exists for provider '{provider}'"),
            )),
            Err(e) => Err(e),
        }
    }

    pub fn update_pricing(
        &self,
        acting_user_id: &str,
        pricing_id: &str,
        input_cost_per_1k_micros: Option<i64>,
        output_cost_per_1k_micros: Option<i64>,
        margin_multiplier: Option<f64>,
    ) -> Result<PricingConfig, AppError> {
        self.require_admin(acting_user_id)?;
        if matches!(margin_multiplier, Some(m) if m <= 0.0) {
            return Err(AppError::Validation("margin_multiplier must be positive".into()));
        }
        let conn = self.pool.get()?;
        admin_config::update_pricing(
            &conn,
            pricing_id,
            input_cost_per_1k_micros,
            output_cost_per_1k_micros,
            margin_multiplier,
        )?
        .ok_or_else(|| AppError::NotFound(format!("Pricing {pricing_id}")))
    }

    /// Delete a pricing row; the only current pricing of an active model
    /// must stay — a metered call would otherwise fail closed.
    pub fn delete_pricing(&self, acting_user_id: &str, pricing_id: &str) -> Result<(), AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        let row = admin_config::get_pricing_by_id(&conn, pricing_id)?
            .ok_or_else(|| AppError::NotFound(format!("Pricing {pricing_id}")))?;

        let today = today_ymd();
        if row.effective_date.as_str() <= today.as_str() {
            let model_active = admin_config::get_model(&conn, &row.provider, &row.model)?
                .map(|m| m.is_active)
                .unwrap_or(false);
            if model_active {
                let others = admin_config::count_other_current_pricing(
                    &conn,
                    &row.provider,
                    &row.model,
                    &today,
                    pricing_id,
                )?;
                if others == 0 {
                    return Err(AppError::conflict(
                        "LAST_PRICING",
                        format!("Cannot delete the only current pricing for active model '{}'", row.model),
                    ));
                }
            }
        }

        admin_config::delete_pricing(&conn, pricing_id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task routing
    // -----------------------------------------------------------------------

    pub fn list_routing(
        &self,
        acting_user_id: &str,
        provider: Option<&str>,
    ) -> Result<Vec<TaskRoutingView>, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        admin_config::list_routing(&conn, provider)
    }

    pub fn create_routing(
        &self,
        acting_user_id: &str,
        provider: &str,
        task_type: &str,
        model: &str,
    ) -> Result<TaskRoutingConfig, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;

        // The target must be registered and active.
        let registered = admin_config::get_model(&conn, provider, model)?;
        if !registered.map(|m| m.is_active).unwrap_or(false) {
            return Err(AppError::NotFound(format!("Model {provider}/{model}")));
        }

        match admin_config::insert_routing(&conn, provider, task_type, model) {
            Ok(row) => Ok(row),
            Err(e) if e.is_unique_violation() => Err(AppError::conflict(
                "DUPLICATE_ROUTING",
                format!("Routing for task '{task_type}' already exists for provider '{provider}'"),
            )),
            Err(e) => Err(e),
        }
    }

    pub fn update_routing(
        &self,
        acting_user_id: &str,
        routing_id: &str,
        model: &str,
    ) -> Result<TaskRoutingConfig, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        let row = admin_config::get_routing_by_id(&conn, routing_id)?
            .ok_or_else(|| AppError::NotFound(format!("Routing {routing_id}")))?;

        let registered = admin_config::get_model(&conn, &row.provider, model)?;
        if !registered.map(|m| m.is_active).unwrap_or(false) {
            return Err(AppError::NotFound(format!("Model {}/{model}", row.provider)));
        }

        admin_config::update_routing_model(&conn, routing_id, model)?
            .ok_or_else(|| AppError::NotFound(format!("Routing {routing_id}")))
    }

    pub fn delete_routing(&self, acting_user_id: &str, routing_id: &str) -> Result<(), AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        if !admin_config::delete_routing(&conn, routing_id)? {
            return Err(AppError::NotFound(format!("Routing {routing_id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // System config
    // -----------------------------------------------------------------------

    pub fn list_config(&self, acting_user_id: &str) -> Result<Vec<SystemConfigEntry>, AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        admin_config::list_config(&conn)
    }

    pub fn upsert_config(
        &self,
        acting_user_id: &str,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<(), AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        admin_config::upsert_config(&conn, key, value, description)
    }

    pub fn delete_config(&self, acting_user_id: &str, key: &str) -> Result<(), AppError> {
        self.require_admin(acting_user_id)?;
        let conn = self.pool.get()?;
        if !admin_config::delete_config(&conn, key)? {
            return Err(AppError::NotFound(format!("System config {key}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Admin users
    // -----------------------------------------------------------------------

    /// Toggle a user's admin flag. Self-demotion and demotion of
    /// env-protected admins are rejected; a demotion invalidates the
    /// target's existing sessions.
    pub fn toggle_admin(
        &self,
        acting_user_id: &str,
        target_user_id: &str,
        is_admin: bool,
    ) -> Result<User, AppError> {
        self.require_admin(acting_user_id)?;

        if acting_user_id == target_user_id && !is_admin {
            return Err(AppError::conflict(
                "CANNOT_DEMOTE_SELF",
                "Cannot remove your own admin status",
            ));
        }

        let conn = self.pool.get()?;
        let target = users::get_by_id(&conn, target_user_id)?;

        if !is_admin && self.settings.is_protected_admin(&target.email) {
            return Err(AppError::conflict(
                "ADMIN_EMAILS_PROTECTED",
                "Cannot demote this user — protected by ADMIN_EMAILS",
            ));
        }

        users::set_admin(&conn, target_user_id, is_admin, !is_admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::CreateUserInput;
    use std::path::PathBuf;

    struct Fixture {
        svc: AdminService,
        pool: DbPool,
        admin_id: String,
        regular_id: String,
    }

    fn setup() -> Fixture {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let admin = users::create(&conn, CreateUserInput {
            email: format!("{}@admin.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: Some(true),
        }).unwrap();
        let regular = users::create(&conn, CreateUserInput {
            email: format!("{}@user.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        drop(conn);
        let settings = Settings {
            db_path: PathBuf::from("unused.db"),
            admin_emails: vec!["root@example.com".into()],
            anthropic_api_key: None,
            openai_api_key: None,
            gemini_api_key: None,
            adzuna_app_id: None,
            adzuna_app_key: None,
            usajobs_api_key: None,
        };
        Fixture {
            svc: AdminService::new(pool.clone(), settings),
            pool,
            admin_id: admin.id,
            regular_id: regular.id,
        }
    }

    #[test]
    fn test_non_admin_rejected() {
        let f = setup();
        let err = f
            .svc
            .create_model(&f.regular_id, "claude", "m1", "Model One", "llm")
            .unwrap_err();
        assert!(matches!(err, AppError::AdminRequired));
    }

    #[test]
    fn test_duplicate_model_conflict() {
        let f = setup();
        f.svc.create_model(&f.admin_id, "claude", "m1", "Model One", "llm").unwrap();
        let err = f
            .svc
            .create_model(&f.admin_id, "claude", "m1", "Again", "llm")
            .unwrap_err();
        assert_eq!(err.kind(), "DUPLICATE_MODEL");
    }

    #[test]
    fn test_delete_model_in_use_rejected() {
        let f = setup();
        let model = f.svc.create_model(&f.admin_id, "claude", "m1", "Model One", "llm").unwrap();
        f.svc.create_routing(&f.admin_id, "claude", "_default", "m1").unwrap();

        let err = f.svc.delete_model(&f.admin_id, &model.id).unwrap_err();
        assert_eq!(err.kind(), "MODEL_IN_USE");

        // Drop the routing; deletion then succeeds.
        let routing = f.svc.list_routing(&f.admin_id, Some("claude")).unwrap();
        f.svc.delete_routing(&f.admin_id, &routing[0].routing.id).unwrap();
        f.svc.delete_model(&f.admin_id, &model.id).unwrap();
    }

    #[test]
    fn test_pricing_requires_registered_model() {
        let f = setup();
        let err = f
            .svc
            .create_pricing(&f.admin_id, "claude", "ghost-model", 1000, 3000, 1.3, "2026-01-01")
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_duplicate_pricing_conflict() {
        let f = setup();
        f.svc.create_model(&f.admin_id, "claude", "m1", "Model One", "llm").unwrap();
        f.svc
            .create_pricing(&f.admin_id, "claude", "m1", 1000, 3000, 1.3, "2026-01-01")
            .unwrap();
        let err = f
            .svc
            .create_pricing(&f.admin_id, "claude", "m1", 2000, 6000, 1.3, "2026-01-01")
            .unwrap_err();
        assert_eq!(err.kind(), "DUPLICATE_PRICING");
    }

    #[test]
    fn test_last_pricing_protected() {
        let f = setup();
        f.svc.create_model(&f.admin_id, "claude", "m1", "Model One", "llm").unwrap();
        let only = f
            .svc
            .create_pricing(&f.admin_id, "claude", "m1", 1000, 3000, 1.3, "2026-01-01")
            .unwrap();

        let err = f.svc.delete_pricing(&f.admin_id, &only.id).unwrap_err();
        assert_eq!(err.kind(), "LAST_PRICING");

        // A second current row makes the first deletable.
        f.svc
            .create_pricing(&f.admin_id, "claude", "m1", 2000, 6000, 1.3, "2026-02-01")
            .unwrap();
        f.svc.delete_pricing(&f.admin_id, &only.id).unwrap();

        // An inactive model's last pricing is deletable too.
        let model = f.svc.list_models(&f.admin_id, Some("claude"), None, None).unwrap();
        f.svc
            .update_model(&f.admin_id, &model[0].id, None, Some(false), None)
            .unwrap();
        let remaining = f.svc.list_pricing(&f.admin_id, Some("claude"), Some("m1")).unwrap();
        f.svc
            .delete_pricing(&f.admin_id, &remaining[0].pricing.id)
            .unwrap();
    }

    #[test]
    fn test_routing_requires_active_model() {
        let f = setup();
        let model = f.svc.create_model(&f.admin_id, "claude", "m1", "Model One", "llm").unwrap();
        f.svc.update_model(&f.admin_id, &model.id, None, Some(false), None).unwrap();

        let err = f
            .svc
            .create_routing(&f.admin_id, "claude", "cover_letter", "m1")
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_cannot_demote_self() {
        let f = setup();
        let err = f.svc.toggle_admin(&f.admin_id, &f.admin_id, false).unwrap_err();
        assert_eq!(err.kind(), "CANNOT_DEMOTE_SELF");
    }

    #[test]
    fn test_protected_admin_email() {
        let f = setup();
        let conn = f.pool.get().unwrap();
        let protected = users::create(&conn, CreateUserInput {
            email: "Root@Example.com".into(),
            password_hash: None,
            is_admin: Some(true),
        }).unwrap();
        drop(conn);

        let err = f.svc.toggle_admin(&f.admin_id, &protected.id, false).unwrap_err();
        assert_eq!(err.kind(), "ADMIN_EMAILS_PROTECTED");
    }

    #[test]
    fn test_demotion_invalidates_sessions() {
        let f = setup();
        let promoted = f.svc.toggle_admin(&f.admin_id, &f.regular_id, true).unwrap();
        assert!(promoted.is_admin);
        // Promotion does not invalidate sessions.
        assert!(promoted.token_invalidated_before.is_none());

        let demoted = f.svc.toggle_admin(&f.admin_id, &f.regular_id, false).unwrap();
        assert!(!demoted.is_admin);
        assert!(demoted.token_invalidated_before.is_some());
    }
}
