use serde::{Deserialize, Serialize};

/// Normalized lifecycle status of a receivable title.
///
/// Omie reports `status_titulo` as a free-form uppercase string; the raw
/// value is persisted as-is and this enum is the normalized view used by
/// balance rules and aggregation filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTitulo {
    /// Not yet due.
    Pendente,

    /// Past due date, nothing or not everything collected.
    Atrasado,

    /// Partially settled.
    Parcial,

    /// Fully settled.
    Recebido,

    /// Cancelled upstream. Terminal; excluded from monetary aggregation.
    Cancelado,
}

impl StatusTitulo {
    /// Parse the raw Omie status string. Unknown values fall back to `Pendente`.
    pub fn from_raw(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        match upper.as_str() {
            "RECEBIDO" | "LIQUIDADO" | "PAGO" => Self::Recebido,
            "CANCELADO" => Self::Cancelado,
            "ATRASADO" | "VENCIDO" => Self::Atrasado,
            "PARCIAL" | "RECEBIDO PARCIAL" => Self::Parcial,
            _ => Self::Pendente,
        }
    }

    /// Settled or cancelled titles carry no open balance at ingestion time.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Recebido | Self::Cancelado)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_statuses() {
        assert_eq!(StatusTitulo::from_raw("RECEBIDO"), StatusTitulo::Recebido);
        assert_eq!(StatusTitulo::from_raw("cancelado"), StatusTitulo::Cancelado);
        assert_eq!(StatusTitulo::from_raw("ATRASADO"), StatusTitulo::Atrasado);
        assert_eq!(StatusTitulo::from_raw(" A VENCER "), StatusTitulo::Pendente);
    }

    #[test]
    fn unknown_status_falls_back_to_pendente() {
        assert_eq!(StatusTitulo::from_raw("???"), StatusTitulo::Pendente);
    }

    #[test]
    fn closed_statuses() {
        assert!(StatusTitulo::Recebido.is_closed());
        assert!(StatusTitulo::Cancelado.is_closed());
        assert!(!StatusTitulo::Atrasado.is_closed());
    }
}
