use std::convert::Infallible;

use super::{
    AliasDefinition, AliasSource, Ast, BinaryOp, Direction, Join, JoinKind, NodeId, Request,
    SelectInfo, UnaryOp,
};
use crate::model::Value;

/// Receiver side of [`Ast::accept`].
///
/// Children of every expression node are visited before the node itself, so a
/// stack-based visitor can pop their results in its `visit_*` method.
pub trait NodeVisitor {
    type Error;

    /// Requests drive their own parts; implementations call `ast.accept` on them.
    fn visit_request(
        &mut self,
        ast: &Ast,
        id: NodeId,
        request: &Request,
    ) -> Result<(), Self::Error>;

    fn visit_alias(
        &mut self,
        ast: &Ast,
        id: NodeId,
        alias: &AliasDefinition,
    ) -> Result<(), Self::Error>;

    fn visit_column(
        &mut self,
        ast: &Ast,
        id: NodeId,
        alias: NodeId,
        column: &str,
    ) -> Result<(), Self::Error>;

    fn visit_identifier(&mut self, ast: &Ast, id: NodeId, name: &str) -> Result<(), Self::Error>;

    fn visit_constant(&mut self, ast: &Ast, id: NodeId, value: &Value) -> Result<(), Self::Error>;

    fn visit_binary(
        &mut self,
        ast: &Ast,
        id: NodeId,
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<(), Self::Error>;

    fn visit_unary(
        &mut self,
        ast: &Ast,
        id: NodeId,
        op: UnaryOp,
        operand: NodeId,
    ) -> Result<(), Self::Error>;

    fn visit_in(
        &mut self,
        ast: &Ast,
        id: NodeId,
        operand: NodeId,
        values: &[NodeId],
    ) -> Result<(), Self::Error>;

    fn visit_conditional(&mut self, ast: &Ast, id: NodeId) -> Result<(), Self::Error>;

    fn visit_join(&mut self, ast: &Ast, id: NodeId, join: &Join) -> Result<(), Self::Error>;

    fn visit_order(
        &mut self,
        ast: &Ast,
        id: NodeId,
        direction: Direction,
    ) -> Result<(), Self::Error>;

    fn visit_select_info(
        &mut self,
        ast: &Ast,
        id: NodeId,
        info: &SelectInfo,
    ) -> Result<(), Self::Error>;

    fn visit_assignment(&mut self, ast: &Ast, id: NodeId, column: &str) -> Result<(), Self::Error>;
}

pub(crate) fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "<>",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Concat => "||",
        BinaryOp::Like => "LIKE",
    }
}

/// Renders a subtree as an s-expression.
#[derive(Default)]
pub(crate) struct Printer {
    stack: Vec<String>,
}

impl Printer {
    fn pop(&mut self) -> String {
        self.stack.pop().unwrap_or_default()
    }

    fn pop_n(&mut self, n: usize) -> Vec<String> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    pub(crate) fn finish(mut self) -> String {
        self.pop()
    }
}

impl NodeVisitor for Printer {
    type Error = Infallible;

    fn visit_request(
        &mut self,
        ast: &Ast,
        _id: NodeId,
        request: &Request,
    ) -> Result<(), Infallible> {
        let mut parts = vec![format!("{:?}", request.kind).to_lowercase()];
        let mut part = |ast: &Ast, printer: &mut Printer, label: &str, ids: &[NodeId]| {
            if ids.is_empty() {
                return;
            }
            let mut items = Vec::new();
            for id in ids {
                let _ = ast.accept(*id, printer);
                items.push(printer.pop());
            }
            parts.push(format!("({} {})", label, items.join(" ")));
        };
        part(ast, self, "select", &request.select);
        part(ast, self, "from", &request.from.into_iter().collect::<Vec<_>>());
        part(ast, self, "joins", &request.joins);
        part(ast, self, "where", &request.filter.into_iter().collect::<Vec<_>>());
        part(ast, self, "group", &request.group_by);
        part(ast, self, "having", &request.having.into_iter().collect::<Vec<_>>());
        part(ast, self, "order", &request.order_by);
        part(ast, self, "set", &request.assignments);
        if let Some(skip) = request.skip {
            parts.push(format!("(skip {})", skip));
        }
        if let Some(take) = request.take {
            parts.push(format!("(take {})", take));
        }
        self.stack.push(format!("({})", parts.join(" ")));
        Ok(())
    }

    fn visit_alias(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        alias: &AliasDefinition,
    ) -> Result<(), Infallible> {
        let source = match alias.source {
            AliasSource::Table(ref table) => table.clone(),
            AliasSource::Subquery(_) => self.pop(),
        };
        self.stack.push(format!("{} {}", source, alias.name));
        Ok(())
    }

    fn visit_column(
        &mut self,
        ast: &Ast,
        _id: NodeId,
        alias: NodeId,
        column: &str,
    ) -> Result<(), Infallible> {
        let name = ast.alias(alias).map(|a| a.name.as_str()).unwrap_or("?");
        self.stack.push(format!("{}.{}", name, column));
        Ok(())
    }

    fn visit_identifier(&mut self, _ast: &Ast, _id: NodeId, name: &str) -> Result<(), Infallible> {
        self.stack.push(name.to_string());
        Ok(())
    }

    fn visit_constant(&mut self, _ast: &Ast, _id: NodeId, value: &Value) -> Result<(), Infallible> {
        self.stack.push(value.to_string());
        Ok(())
    }

    fn visit_binary(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        op: BinaryOp,
        _left: NodeId,
        _right: NodeId,
    ) -> Result<(), Infallible> {
        let left = self.pop();
        let right = self.pop();
        self.stack.push(format!("({} {} {})", op_symbol(op), left, right));
        Ok(())
    }

    fn visit_unary(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        op: UnaryOp,
        _operand: NodeId,
    ) -> Result<(), Infallible> {
        let operand = self.pop();
        let name = match op {
            UnaryOp::Not => "not".to_string(),
            UnaryOp::Negate => "-".to_string(),
            UnaryOp::Exists => "exists".to_string(),
            UnaryOp::Subquery => "scalar".to_string(),
            UnaryOp::Aggregate(f) => f.sql_name().to_lowercase(),
        };
        self.stack.push(format!("({} {})", name, operand));
        Ok(())
    }

    fn visit_in(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        _operand: NodeId,
        values: &[NodeId],
    ) -> Result<(), Infallible> {
        let values = self.pop_n(values.len());
        let operand = self.pop();
        self.stack.push(format!("(in {} [{}])", operand, values.join(" ")));
        Ok(())
    }

    fn visit_conditional(&mut self, _ast: &Ast, _id: NodeId) -> Result<(), Infallible> {
        let parts = self.pop_n(3);
        self.stack.push(format!("(if {})", parts.join(" ")));
        Ok(())
    }

    fn visit_join(&mut self, _ast: &Ast, _id: NodeId, join: &Join) -> Result<(), Infallible> {
        let condition = self.pop();
        let alias = self.pop();
        let kind = match join.kind {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
        };
        self.stack.push(format!("({} {} {})", kind, alias, condition));
        Ok(())
    }

    fn visit_order(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        direction: Direction,
    ) -> Result<(), Infallible> {
        let expr = self.pop();
        let suffix = match direction {
            Direction::Ascending => "",
            Direction::Descending => " desc",
        };
        self.stack.push(format!("{}{}", expr, suffix));
        Ok(())
    }

    fn visit_select_info(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        info: &SelectInfo,
    ) -> Result<(), Infallible> {
        let expr = self.pop();
        let marker = if info.starts_new_element { "^" } else { "" };
        self.stack.push(format!("{}{}", marker, expr));
        Ok(())
    }

    fn visit_assignment(
        &mut self,
        _ast: &Ast,
        _id: NodeId,
        column: &str,
    ) -> Result<(), Infallible> {
        let value = self.pop();
        self.stack.push(format!("{}={}", column, value));
        Ok(())
    }
}
