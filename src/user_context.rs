use crate::{
    attributes::BUCKETING_ID_ATTRIBUTE,
    decision::DecisionReasons,
    forced_decisions::{DecisionContext, ForcedDecision, ForcedDecisions},
    AttributeValue, Attributes, Result,
};

/// A user being decided for: id, attributes, and the user's own forced decisions.
///
/// Cloning a context copies its forced decisions; the copies evolve independently.
#[derive(Debug, Clone)]
pub struct UserContext {
    user_id: String,
    attributes: Attributes,
    forced_decisions: ForcedDecisions,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, attributes: Attributes) -> Self {
        UserContext {
            user_id: user_id.into(),
            attributes,
            forced_decisions: ForcedDecisions::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn set_forced_decision(
        &self,
        context: DecisionContext,
        decision: ForcedDecision,
    ) -> Result<()> {
        self.forced_decisions.set(context, decision)
    }

    pub fn get_forced_decision(&self, context: &DecisionContext) -> Option<ForcedDecision> {
        self.forced_decisions.get(context)
    }

    pub fn remove_forced_decision(&self, context: &DecisionContext) -> bool {
        self.forced_decisions.remove(context)
    }

    pub fn remove_all_forced_decisions(&self) {
        self.forced_decisions.remove_all()
    }

    pub(crate) fn forced_decisions(&self) -> &ForcedDecisions {
        &self.forced_decisions
    }

    /// The id used for bucketing: the reserved bucketing id attribute if it is a string,
    /// otherwise the user id.
    pub fn bucketing_id(&self, reasons: &mut DecisionReasons) -> &str {
        match self.attributes.get(BUCKETING_ID_ATTRIBUTE) {
            Some(AttributeValue::String(bucketing_id)) => bucketing_id,
            Some(_) => {
                reasons.info("Bucketing ID attribute is not a string. Defaulted to user ID.");
                &self.user_id
            }
            None => &self.user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::UserContext;
    use crate::{
        attributes::BUCKETING_ID_ATTRIBUTE,
        decision::{DecideOptions, DecisionReasons},
        forced_decisions::{DecisionContext, ForcedDecision},
    };

    #[test]
    fn bucketing_id_prefers_string_attribute() {
        let mut reasons = DecisionReasons::new(&DecideOptions::default());
        let mut user = UserContext::new("user", HashMap::new());
        assert_eq!(user.bucketing_id(&mut reasons), "user");

        user.set_attribute(BUCKETING_ID_ATTRIBUTE, "bucket-me");
        assert_eq!(user.bucketing_id(&mut reasons), "bucket-me");

        user.set_attribute(BUCKETING_ID_ATTRIBUTE, 42.0);
        let mut reasons = DecisionReasons::new(&DecideOptions {
            include_reasons: true,
            ..Default::default()
        });
        assert_eq!(user.bucketing_id(&mut reasons), "user");
        assert_eq!(reasons.as_slice().len(), 1);
    }

    #[test]
    fn cloned_context_has_independent_forced_decisions() {
        let user = UserContext::new("user", HashMap::new());
        let context = DecisionContext::new("flag", None);
        user.set_forced_decision(context.clone(), ForcedDecision::new("on"))
            .unwrap();

        let copy = user.clone();
        user.remove_all_forced_decisions();

        assert_eq!(user.get_forced_decision(&context), None);
        assert_eq!(
            copy.get_forced_decision(&context),
            Some(ForcedDecision::new("on"))
        );
        assert!(copy.remove_forced_decision(&context));
        assert!(!copy.remove_forced_decision(&context));
    }
}
