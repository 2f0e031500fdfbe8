//! Inspection handlers, answered by the interpreter.
//! - handle_scopes: scopes of a frame
//! - handle_variables: children of a variables reference
//! - handle_set_variable: assign through a variables reference
//! - handle_evaluate: evaluate an expression in a frame

use serde_json::Value;

use crate::protocol::{
    EvaluateArguments, EvaluateResponseBody, Request, Scope, ScopesArguments, ScopesResponseBody,
    SetVariableArguments, SetVariableResponseBody, Variable, VariablesArguments,
    VariablesResponseBody,
};

use super::super::{Debugger, DispatchOutcome, StopScope};

impl Debugger {
    pub(in crate::adapter) fn handle_scopes(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<ScopesArguments>(value).ok())
        else {
            return self.fail(request, "invalid scopes args");
        };
        let scopes = match scope.ctx.scopes(args.frame_id) {
            Ok(scopes) => scopes,
            Err(err) => return self.fail(request, &err.to_string()),
        };
        let scopes = scopes
            .into_iter()
            .map(|info| Scope {
                name: info.name,
                variables_reference: info.variables_reference,
                expensive: info.expensive,
            })
            .collect();
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(ScopesResponseBody { scopes }))],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_variables(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<VariablesArguments>(value).ok())
        else {
            return self.fail(request, "invalid variables args");
        };
        let variables = match scope.ctx.variables(args.variables_reference) {
            Ok(variables) => variables,
            Err(err) => return self.fail(request, &err.to_string()),
        };
        let variables = variables
            .into_iter()
            .map(|info| Variable {
                name: info.name,
                value: info.value,
                r#type: info.type_name,
                variables_reference: info.variables_reference,
            })
            .collect();
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(VariablesResponseBody { variables }))],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_set_variable(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<SetVariableArguments>(value).ok())
        else {
            return self.fail(request, "invalid setVariable args");
        };
        let updated = match scope
            .ctx
            .set_variable(args.variables_reference, &args.name, &args.value)
        {
            Ok(updated) => updated,
            Err(err) => return self.fail(request, &err.to_string()),
        };
        let body = SetVariableResponseBody {
            value: updated.value,
            r#type: updated.type_name,
            variables_reference: updated.variables_reference,
        };
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(body))],
            ..DispatchOutcome::default()
        }
    }

    pub(in crate::adapter) fn handle_evaluate(
        &self,
        scope: &mut StopScope<'_>,
        request: &Request<Value>,
    ) -> DispatchOutcome {
        let Some(args) = request
            .arguments
            .clone()
            .and_then(|value| serde_json::from_value::<EvaluateArguments>(value).ok())
        else {
            return self.fail(request, "invalid evaluate args");
        };
        let result = match scope.ctx.evaluate(&args.expression, args.frame_id) {
            Ok(result) => result,
            Err(err) => return self.fail(request, &err.to_string()),
        };
        let body = EvaluateResponseBody {
            result: result.value,
            r#type: result.type_name,
            variables_reference: result.variables_reference,
        };
        DispatchOutcome {
            responses: vec![self.ok_response(request, Some(body))],
            ..DispatchOutcome::default()
        }
    }
}
