//! Opcodes do Blast
//!
//! Definição da ISA: statements, operadores, constantes, funções e operações de bit.
//! Bytes `0x80..=0xFF` não são opcodes: referenciam o slot de dados `byte - ID_BASE`.

/// Primeiro byte de referência a dado (`id`)
pub const ID_BASE: u8 = 0x80;

/// Primeiro tag de header CDATA (`CDATA_BASE + encoding`)
pub const CDATA_BASE: u8 = 0x30;

/// Categorias de opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpcodeCategory {
    /// Statements e controle de fluxo (0x00-0x0F)
    Control = 0x00,
    /// Operadores (0x10-0x1F)
    Operator = 0x10,
    /// Constantes e stack (0x20-0x2F)
    Constant = 0x20,
    /// Blocos CDATA (0x30-0x3F)
    CData = 0x30,
    /// Funções (0x40-0x4F)
    Function = 0x40,
    /// Operações de bit (0x50-0x5F)
    Bit = 0x50,
    /// Fastlane de atribuição direta (0x60-0x6F)
    Fastlane = 0x60,
    /// Valores constantes (0x70-0x7F)
    Value = 0x70,
    /// Referência a dado (0x80-0xFF)
    Id = 0x80,
}

impl OpcodeCategory {
    /// Obtém categoria de um byte
    pub fn from_byte(byte: u8) -> Self {
        if byte >= ID_BASE {
            return Self::Id;
        }
        match byte & 0xF0 {
            0x00 => Self::Control,
            0x10 => Self::Operator,
            0x20 => Self::Constant,
            0x30 => Self::CData,
            0x40 => Self::Function,
            0x50 => Self::Bit,
            0x60 => Self::Fastlane,
            _ => Self::Value,
        }
    }
}

/// Opcodes do Blast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlastOpcode {
    // ═══════════════════════════════════════════════════════════════
    // STATEMENTS E CONTROLE (0x00-0x0F)
    // ═══════════════════════════════════════════════════════════════

    /// Terminador de statement/expressão
    Nop = 0x00,
    /// `assign id expr… nop`
    Assign = 0x01,
    /// `assigns id [substract] operand`
    Assigns = 0x02,
    /// `assignv id c0 … cn`
    Assignv = 0x03,
    /// `assigncd cdataref index expr… nop`
    AssignCData = 0x04,
    /// Fim do script
    Ret = 0x05,
    /// Suspende execução
    Yield = 0x06,
    /// Início de composto
    Begin = 0x07,
    /// Fim de composto
    End = 0x08,
    /// Jump para frente (u8)
    Jump = 0x09,
    /// Jump para trás (u8)
    JumpBack = 0x0A,
    /// Jump relativo com sinal (i16)
    JumpLong = 0x0B,
    /// Jump se condição == 0
    Jz = 0x0C,
    /// Jump se condição != 0
    Jnz = 0x0D,

    // ═══════════════════════════════════════════════════════════════
    // OPERADORES (0x10-0x1F)
    // ═══════════════════════════════════════════════════════════════

    Add = 0x10,
    Substract = 0x11,
    Multiply = 0x12,
    Divide = 0x13,
    And = 0x14,
    Or = 0x15,
    Xor = 0x16,
    Greater = 0x17,
    GreaterEquals = 0x18,
    Smaller = 0x19,
    SmallerEquals = 0x1A,
    Equals = 0x1B,
    NotEquals = 0x1C,
    /// Negação lógica unária
    Not = 0x1D,

    // ═══════════════════════════════════════════════════════════════
    // CONSTANTES E STACK (0x20-0x2F)
    // ═══════════════════════════════════════════════════════════════

    /// f32 embutido (4 bytes LE)
    ConstantF1 = 0x20,
    /// f32 truncado embutido (2 bytes)
    ConstantF1H = 0x21,
    /// Referência para trás a uma constante (u8)
    ConstantShortRef = 0x22,
    /// Referência para trás a uma constante (u16 BE)
    ConstantLongRef = 0x23,
    /// Pop do topo da stack
    Pop = 0x24,
    /// Leitura do topo da stack
    Peek = 0x25,
    /// `push expr… nop`
    Push = 0x26,
    /// `pushv n c0 … cn`
    Pushv = 0x27,

    // ═══════════════════════════════════════════════════════════════
    // CDATA (0x30-0x3F)
    // ═══════════════════════════════════════════════════════════════

    CDataNone = 0x30,
    CDataU8Fp32 = 0x31,
    CDataS8Fp32 = 0x32,
    CDataFp8Fp32 = 0x33,
    CDataFp16Fp32 = 0x34,
    CDataFp32Fp32 = 0x35,
    CDataI8I32 = 0x36,
    CDataI16I32 = 0x37,
    CDataI32I32 = 0x38,
    CDataBool32 = 0x39,
    CData = 0x3A,
    /// Referência a bloco CDATA (u16 BE, delta para trás)
    CDataRef = 0x3F,

    // ═══════════════════════════════════════════════════════════════
    // FUNÇÕES (0x40-0x4F)
    // ═══════════════════════════════════════════════════════════════

    Abs = 0x40,
    Min = 0x41,
    Max = 0x42,
    Sqrt = 0x43,
    Sin = 0x44,
    Cos = 0x45,
    Floor = 0x46,
    Ceil = 0x47,
    Fma = 0x48,
    Lerp = 0x49,
    Clamp = 0x4A,
    Select = 0x4B,
    Length = 0x4C,
    Sign = 0x4D,
    Frac = 0x4E,
    /// Chamada de função externa (`call id params…`)
    Call = 0x4F,

    // ═══════════════════════════════════════════════════════════════
    // BITS (0x50-0x5F)
    // ═══════════════════════════════════════════════════════════════

    GetBit = 0x50,
    GetBits = 0x51,
    SetBit = 0x52,
    SetBits = 0x53,
    Rol = 0x54,
    Ror = 0x55,
    Shr = 0x56,
    Shl = 0x57,
    Tzcnt = 0x58,
    Lzcnt = 0x59,
    CountBits = 0x5A,

    // ═══════════════════════════════════════════════════════════════
    // FASTLANE (0x60-0x6F)
    // ═══════════════════════════════════════════════════════════════

    Increment = 0x60,
    Decrement = 0x61,
    AssignAdd = 0x62,
    AssignSub = 0x63,
    AssignMul = 0x64,
    AssignDiv = 0x65,

    // ═══════════════════════════════════════════════════════════════
    // VALORES (0x70-0x7F)
    // ═══════════════════════════════════════════════════════════════

    Value0 = 0x70,
    Value1 = 0x71,
    Value2 = 0x72,
    Value4 = 0x73,
    Value10 = 0x74,
    ValueHalf = 0x75,
    Pi = 0x76,
    InvPi = 0x77,
    Epsilon = 0x78,
    Infinity = 0x79,
    NegativeInfinity = 0x7A,
    Nan = 0x7B,
    MinValue = 0x7C,
    MaxValue = 0x7D,
}

impl BlastOpcode {
    /// Decodifica byte (None para ids e bytes não atribuídos)
    pub fn from_byte(byte: u8) -> Option<Self> {
        use BlastOpcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => Assign,
            0x02 => Assigns,
            0x03 => Assignv,
            0x04 => AssignCData,
            0x05 => Ret,
            0x06 => Yield,
            0x07 => Begin,
            0x08 => End,
            0x09 => Jump,
            0x0A => JumpBack,
            0x0B => JumpLong,
            0x0C => Jz,
            0x0D => Jnz,

            0x10 => Add,
            0x11 => Substract,
            0x12 => Multiply,
            0x13 => Divide,
            0x14 => And,
            0x15 => Or,
            0x16 => Xor,
            0x17 => Greater,
            0x18 => GreaterEquals,
            0x19 => Smaller,
            0x1A => SmallerEquals,
            0x1B => Equals,
            0x1C => NotEquals,
            0x1D => Not,

            0x20 => ConstantF1,
            0x21 => ConstantF1H,
            0x22 => ConstantShortRef,
            0x23 => ConstantLongRef,
            0x24 => Pop,
            0x25 => Peek,
            0x26 => Push,
            0x27 => Pushv,

            0x30 => CDataNone,
            0x31 => CDataU8Fp32,
            0x32 => CDataS8Fp32,
            0x33 => CDataFp8Fp32,
            0x34 => CDataFp16Fp32,
            0x35 => CDataFp32Fp32,
            0x36 => CDataI8I32,
            0x37 => CDataI16I32,
            0x38 => CDataI32I32,
            0x39 => CDataBool32,
            0x3A => CData,
            0x3F => CDataRef,

            0x40 => Abs,
            0x41 => Min,
            0x42 => Max,
            0x43 => Sqrt,
            0x44 => Sin,
            0x45 => Cos,
            0x46 => Floor,
            0x47 => Ceil,
            0x48 => Fma,
            0x49 => Lerp,
            0x4A => Clamp,
            0x4B => Select,
            0x4C => Length,
            0x4D => Sign,
            0x4E => Frac,
            0x4F => Call,

            0x50 => GetBit,
            0x51 => GetBits,
            0x52 => SetBit,
            0x53 => SetBits,
            0x54 => Rol,
            0x55 => Ror,
            0x56 => Shr,
            0x57 => Shl,
            0x58 => Tzcnt,
            0x59 => Lzcnt,
            0x5A => CountBits,

            0x60 => Increment,
            0x61 => Decrement,
            0x62 => AssignAdd,
            0x63 => AssignSub,
            0x64 => AssignMul,
            0x65 => AssignDiv,

            0x70 => Value0,
            0x71 => Value1,
            0x72 => Value2,
            0x73 => Value4,
            0x74 => Value10,
            0x75 => ValueHalf,
            0x76 => Pi,
            0x77 => InvPi,
            0x78 => Epsilon,
            0x79 => Infinity,
            0x7A => NegativeInfinity,
            0x7B => Nan,
            0x7C => MinValue,
            0x7D => MaxValue,

            _ => return None,
        })
    }

    /// Retorna categoria do opcode
    pub fn category(&self) -> OpcodeCategory {
        OpcodeCategory::from_byte(*self as u8)
    }

    /// Valor dos opcodes de constante (dispatch de constant folding)
    pub fn constant_value(&self) -> Option<f32> {
        use BlastOpcode::*;
        Some(match self {
            Value0 => 0.0,
            Value1 => 1.0,
            Value2 => 2.0,
            Value4 => 4.0,
            Value10 => 10.0,
            ValueHalf => 0.5,
            Pi => std::f32::consts::PI,
            InvPi => std::f32::consts::FRAC_1_PI,
            Epsilon => f32::EPSILON,
            Infinity => f32::INFINITY,
            NegativeInfinity => f32::NEG_INFINITY,
            Nan => f32::NAN,
            MinValue => f32::MIN,
            MaxValue => f32::MAX,
            _ => return None,
        })
    }

    /// Header de bloco CDATA
    pub fn is_cdata_header(&self) -> bool {
        (*self as u8) >= CDATA_BASE && (*self as u8) <= BlastOpcode::CData as u8
    }

    /// Função builtin com número fixo de parâmetros
    pub fn builtin_parameter_count(&self) -> Option<usize> {
        use BlastOpcode::*;
        match self {
            Abs | Sqrt | Sin | Cos | Floor | Ceil | Length | Sign | Frac => Some(1),
            Min | Max => Some(2),
            Fma | Lerp | Clamp | Select => Some(3),
            _ => None,
        }
    }

    /// Opcode que produz valor como função (builtin, externa ou leitura de bits)
    pub fn is_function(&self) -> bool {
        use BlastOpcode::*;
        self.builtin_parameter_count().is_some()
            || matches!(self, Call | GetBit | GetBits | Tzcnt | Lzcnt | CountBits)
    }

    /// Retorna mnemônico
    pub fn mnemonic(&self) -> &'static str {
        use BlastOpcode::*;
        match self {
            Nop => "nop",
            Assign => "assign",
            Assigns => "assigns",
            Assignv => "assignv",
            AssignCData => "assigncd",
            Ret => "ret",
            Yield => "yield",
            Begin => "begin",
            End => "end",
            Jump => "jump",
            JumpBack => "jump_back",
            JumpLong => "jump_long",
            Jz => "jz",
            Jnz => "jnz",
            Add => "add",
            Substract => "substract",
            Multiply => "multiply",
            Divide => "divide",
            And => "and",
            Or => "or",
            Xor => "xor",
            Greater => "greater",
            GreaterEquals => "greater_equals",
            Smaller => "smaller",
            SmallerEquals => "smaller_equals",
            Equals => "equals",
            NotEquals => "not_equals",
            Not => "not",
            ConstantF1 => "constant_f1",
            ConstantF1H => "constant_f1_h",
            ConstantShortRef => "constant_short_ref",
            ConstantLongRef => "constant_long_ref",
            Pop => "pop",
            Peek => "peek",
            Push => "push",
            Pushv => "pushv",
            CDataNone => "cdata_none",
            CDataU8Fp32 => "cdata_u8_fp32",
            CDataS8Fp32 => "cdata_s8_fp32",
            CDataFp8Fp32 => "cdata_fp8_fp32",
            CDataFp16Fp32 => "cdata_fp16_fp32",
            CDataFp32Fp32 => "cdata_fp32_fp32",
            CDataI8I32 => "cdata_i8_i32",
            CDataI16I32 => "cdata_i16_i32",
            CDataI32I32 => "cdata_i32_i32",
            CDataBool32 => "cdata_bool32",
            CData => "cdata",
            CDataRef => "cdataref",
            Abs => "abs",
            Min => "min",
            Max => "max",
            Sqrt => "sqrt",
            Sin => "sin",
            Cos => "cos",
            Floor => "floor",
            Ceil => "ceil",
            Fma => "fma",
            Lerp => "lerp",
            Clamp => "clamp",
            Select => "select",
            Length => "length",
            Sign => "sign",
            Frac => "frac",
            Call => "call",
            GetBit => "get_bit",
            GetBits => "get_bits",
            SetBit => "set_bit",
            SetBits => "set_bits",
            Rol => "rol",
            Ror => "ror",
            Shr => "shr",
            Shl => "shl",
            Tzcnt => "tzcnt",
            Lzcnt => "lzcnt",
            CountBits => "count_bits",
            Increment => "increment",
            Decrement => "decrement",
            AssignAdd => "assign_add",
            AssignSub => "assign_sub",
            AssignMul => "assign_mul",
            AssignDiv => "assign_div",
            Value0 => "value_0",
            Value1 => "value_1",
            Value2 => "value_2",
            Value4 => "value_4",
            Value10 => "value_10",
            ValueHalf => "value_half",
            Pi => "pi",
            InvPi => "inv_pi",
            Epsilon => "epsilon",
            Infinity => "infinity",
            NegativeInfinity => "negative_infinity",
            Nan => "nan",
            MinValue => "min_value",
            MaxValue => "max_value",
        }
    }
}

/// Byte referencia um slot de dados
#[inline(always)]
pub fn is_id(byte: u8) -> bool {
    byte >= ID_BASE
}

/// Mnemônico de qualquer byte (ids incluídos)
pub fn mnemonic_of(byte: u8) -> String {
    if is_id(byte) {
        format!("id({})", byte - ID_BASE)
    } else {
        BlastOpcode::from_byte(byte)
            .map(|op| op.mnemonic().to_string())
            .unwrap_or_else(|| format!("0x{:02X}", byte))
    }
}

impl std::fmt::Display for BlastOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}
